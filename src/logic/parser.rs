//! Parses the canonical textual form of [`LogicOperator`] back into the AST.

use crate::aggregate::AggregatorType;
use crate::error::{CoreError, CoreResult};
use crate::types::DataType;

use super::operator::{CompareOperator, LogicOperator, MetricOperatorType, StringOperatorType};

/// Splits `s` into the top-level parenthesized groups it contains, verifying that every
/// group is joined to the next by the same connector (`" AND "` or `" OR "`).
fn split_top_level_groups(s: &str) -> CoreResult<(Vec<String>, Option<&'static str>)> {
    let mut groups = Vec::new();
    let mut depth = 0i32;
    let mut start = None;
    let bytes = s.as_bytes();
    let mut connector: Option<&'static str> = None;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'(' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            b')' => {
                depth -= 1;
                if depth == 0 {
                    let begin = start.take().unwrap();
                    groups.push(s[begin..=i].to_string());
                }
            }
            _ => {}
        }
        i += 1;
    }

    if groups.len() > 1 {
        // Inspect the literal text between consecutive groups to find the connector.
        let mut cursor = 0usize;
        for pair in groups.windows(2) {
            let first_end = s[cursor..].find(&pair[0]).map(|p| cursor + p + pair[0].len());
            let first_end = first_end.ok_or_else(|| {
                CoreError::parse("logic sub composite operator string is malformed", s)
            })?;
            let second_start = s[first_end..]
                .find(&pair[1])
                .map(|p| first_end + p)
                .ok_or_else(|| {
                    CoreError::parse("logic sub composite operator string is malformed", s)
                })?;
            let between = s[first_end..second_start].trim();
            let found = if between == "AND" {
                " AND "
            } else if between == "OR" {
                " OR "
            } else {
                return Err(CoreError::parse(
                    format!(
                        "logic sub composite operator string cannot have mixed or unknown connector {between:?}"
                    ),
                    s,
                ));
            };
            match connector {
                None => connector = Some(found),
                Some(c) if c == found => {}
                Some(_) => {
                    return Err(CoreError::parse(
                        "logic sub composite operator string cannot have \"AND\" and \"OR\" as composition",
                        s,
                    ));
                }
            }
            cursor = second_start;
        }
    }

    Ok((groups, connector))
}

fn unquote(token: &str) -> String {
    if token.len() >= 2 && token.starts_with('"') && token.ends_with('"') {
        token[1..token.len() - 1].to_string()
    } else {
        token.to_string()
    }
}

fn parse_value(token: &str, data_type: DataType) -> CoreResult<crate::types::Value> {
    let unquoted = unquote(token);
    data_type
        .cast(&unquoted)
        .ok_or_else(|| CoreError::parse(format!("value {token} does not cast to {data_type}"), token))
}

/// Parses a `VARIABLE ... OF TYPE ... IN TABLE ... <predicate>` atomic operator body
/// (without the enclosing parentheses).
fn parse_variable_atom(body: &str, whole: &str) -> CoreResult<LogicOperator> {
    let rest = body
        .strip_prefix("VARIABLE ")
        .ok_or_else(|| CoreError::parse("logic atomic operator string is invalid", whole))?;
    let idx = rest
        .find(" OF TYPE ")
        .ok_or_else(|| CoreError::parse("logic atomic operator string is invalid", whole))?;
    let variable = rest[..idx].to_string();
    let rest = &rest[idx + " OF TYPE ".len()..];

    let idx = rest
        .find(" IN TABLE ")
        .ok_or_else(|| CoreError::parse("logic atomic operator string is invalid", whole))?;
    let data_type_str = &rest[..idx];
    let data_type: DataType = data_type_str
        .parse()
        .map_err(|_| CoreError::parse(format!("unknown data type {data_type_str}"), whole))?;
    let rest = &rest[idx + " IN TABLE ".len()..];

    if let Some(idx) = rest.find(" IN [") {
        let table = rest[..idx].to_string();
        let list_part = &rest[idx + " IN [".len()..];
        let list_part = list_part
            .strip_suffix(']')
            .ok_or_else(|| CoreError::parse("logic atomic operator string is invalid", whole))?;
        let values = if list_part.is_empty() {
            Vec::new()
        } else {
            split_list_items(list_part)
                .into_iter()
                .map(|tok| parse_value(&tok, data_type))
                .collect::<CoreResult<Vec<_>>>()?
        };
        return Ok(LogicOperator::InList {
            table,
            variable,
            data_type,
            values,
        });
    }

    for (token, compare) in [
        (" IS ", StringOperatorType::Equals),
        (" CONTAINS ", StringOperatorType::Contains),
        (" <> ", StringOperatorType::UnequalTo),
    ] {
        if let Some(idx) = rest.find(token) {
            let table = rest[..idx].to_string();
            let value_token = &rest[idx + token.len()..];
            let value = unquote(value_token);
            return Ok(LogicOperator::String {
                table,
                variable,
                value,
                compare,
            });
        }
    }

    for (token, compare) in [
        (" == ", MetricOperatorType::Equals),
        (" <= ", MetricOperatorType::SmallerOrEqual),
        (" >= ", MetricOperatorType::LargerOrEqual),
        (" < ", MetricOperatorType::Smaller),
        (" > ", MetricOperatorType::Larger),
    ] {
        if let Some(idx) = rest.find(token) {
            let table = rest[..idx].to_string();
            let value_token = &rest[idx + token.len()..];
            let value = parse_value(value_token, data_type)?;
            return Ok(LogicOperator::Metric {
                table,
                variable,
                value,
                data_type,
                compare,
            });
        }
    }

    Err(CoreError::parse("logic atomic operator string is invalid", whole))
}

fn split_list_items(s: &str) -> Vec<String> {
    // Items are comma-space separated; a quoted item may itself contain commas, so we
    // track quote state while splitting.
    let mut items = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    for c in s.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
            current.push(c);
        } else if c == ',' && !in_quotes {
            items.push(current.trim().to_string());
            current = String::new();
        } else {
            current.push(c);
        }
    }
    if !current.trim().is_empty() {
        items.push(current.trim().to_string());
    }
    items
}

fn parse_aggregator_atom(body: &str, whole: &str) -> CoreResult<LogicOperator> {
    let rest = body
        .strip_prefix("AGGREGATE ")
        .ok_or_else(|| CoreError::parse("logic atomic operator string is invalid", whole))?;
    let idx = rest
        .find(" VARIABLE ")
        .ok_or_else(|| CoreError::parse("logic atomic operator string is invalid", whole))?;
    let agg_token = &rest[..idx];
    let aggregator = AggregatorType::from_str_token(agg_token)
        .ok_or_else(|| CoreError::parse(format!("unknown aggregator type {agg_token}"), whole))?;
    let rest = &rest[idx + " VARIABLE ".len()..];

    let idx = rest
        .find(" OF TYPE ")
        .ok_or_else(|| CoreError::parse("logic atomic operator string is invalid", whole))?;
    let variable = rest[..idx].to_string();
    let rest = &rest[idx + " OF TYPE ".len()..];

    let idx = rest
        .find(" IN TABLE ")
        .ok_or_else(|| CoreError::parse("logic atomic operator string is invalid", whole))?;
    let data_type_str = &rest[..idx];
    let data_type: DataType = data_type_str
        .parse()
        .map_err(|_| CoreError::parse(format!("unknown data type {data_type_str}"), whole))?;
    let rest = &rest[idx + " IN TABLE ".len()..];

    for (token, compare) in [
        (" IS ", CompareOperator::String(StringOperatorType::Equals)),
        (" CONTAINS ", CompareOperator::String(StringOperatorType::Contains)),
        (" <> ", CompareOperator::String(StringOperatorType::UnequalTo)),
        (" == ", CompareOperator::Metric(MetricOperatorType::Equals)),
        (" <= ", CompareOperator::Metric(MetricOperatorType::SmallerOrEqual)),
        (" >= ", CompareOperator::Metric(MetricOperatorType::LargerOrEqual)),
        (" < ", CompareOperator::Metric(MetricOperatorType::Smaller)),
        (" > ", CompareOperator::Metric(MetricOperatorType::Larger)),
    ] {
        if let Some(idx) = rest.find(token) {
            let table = rest[..idx].to_string();
            let value_token = &rest[idx + token.len()..];
            let value = match compare {
                CompareOperator::String(_) => {
                    crate::types::Value::Str(unquote(value_token))
                }
                CompareOperator::Metric(_) => parse_value(value_token, data_type)?,
            };
            return LogicOperator::aggregator(table, variable, value, data_type, aggregator, compare);
        }
    }

    Err(CoreError::parse("logic atomic operator string is invalid", whole))
}

/// Parses the canonical textual form of a [`LogicOperator`].
pub fn parse(input: &str) -> CoreResult<LogicOperator> {
    if !input.starts_with('(') {
        return Err(CoreError::parse(
            "logic sub operator string must start with opening parenthesis",
            input,
        ));
    }
    if !input.ends_with(')') {
        return Err(CoreError::parse(
            "logic sub operator string must end with closing parenthesis",
            input,
        ));
    }
    let body = &input[1..input.len() - 1];

    if body == "TRUE" {
        return Ok(LogicOperator::AlwaysTrue);
    }

    if let Some(rest) = body.strip_prefix("NOT ") {
        let inner = parse(rest)?;
        return Ok(LogicOperator::Negated(Box::new(inner)));
    }

    if body.starts_with("VARIABLE ") {
        return parse_variable_atom(body, input);
    }

    if body.starts_with("AGGREGATE ") {
        return parse_aggregator_atom(body, input);
    }

    let (groups, connector) = split_top_level_groups(body)?;
    if groups.is_empty() {
        return Err(CoreError::parse("logic atomic operator string is invalid", input));
    }
    let subs = groups
        .iter()
        .map(|g| parse(g))
        .collect::<CoreResult<Vec<_>>>()?;

    match connector {
        Some(" AND ") | None => Ok(LogicOperator::And(subs)),
        Some(" OR ") => Ok(LogicOperator::Or(subs)),
        Some(_) => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn test_parse_always_true() {
        assert_eq!(parse("(TRUE)").unwrap(), LogicOperator::AlwaysTrue);
    }

    #[test]
    fn test_parse_string_operator() {
        let parsed = parse("(VARIABLE var OF TYPE String IN TABLE table CONTAINS \"val\")").unwrap();
        assert_eq!(
            parsed,
            LogicOperator::String {
                table: "table".into(),
                variable: "var".into(),
                value: "val".into(),
                compare: StringOperatorType::Contains,
            }
        );
        assert_eq!(
            parsed.to_string(),
            "(VARIABLE var OF TYPE String IN TABLE table CONTAINS \"val\")"
        );
    }

    #[test]
    fn test_parse_string_unequal_to_operator_round_trips() {
        let s = "(VARIABLE var OF TYPE String IN TABLE table <> \"val\")";
        let parsed = parse(s).unwrap();
        assert_eq!(
            parsed,
            LogicOperator::String {
                table: "table".into(),
                variable: "var".into(),
                value: "val".into(),
                compare: StringOperatorType::UnequalTo,
            }
        );
        assert_eq!(parsed.to_string(), s);
    }

    #[test]
    fn test_parse_metric_operator() {
        let parsed = parse("(VARIABLE var OF TYPE Decimal IN TABLE table <= 1.5)").unwrap();
        assert_eq!(
            parsed,
            LogicOperator::Metric {
                table: "table".into(),
                variable: "var".into(),
                value: Value::Dec(1.5),
                data_type: DataType::Decimal,
                compare: MetricOperatorType::SmallerOrEqual,
            }
        );
    }

    #[test]
    fn test_parse_in_list_with_whitespace_item() {
        let s = "(VARIABLE var OF TYPE Integer IN TABLE table IN [3, \"weird but valid\"])";
        let parsed = parse(s).unwrap();
        assert_eq!(parsed.to_string(), s);
    }

    #[test]
    fn test_in_list_value_with_comma_is_quoted_and_round_trips() {
        let op = LogicOperator::InList {
            table: "table".into(),
            variable: "var".into(),
            data_type: DataType::String,
            values: vec![Value::Str("a,b".into()), Value::Str("c".into())],
        };
        let printed = op.to_string();
        assert_eq!(printed, "(VARIABLE var OF TYPE String IN TABLE table IN [\"a,b\", c])");
        assert_eq!(parse(&printed).unwrap(), op);
    }

    #[test]
    fn test_parse_negated() {
        let s = "(NOT (VARIABLE var OF TYPE Integer IN TABLE table IN [3, \"weird but valid\"]))";
        let parsed = parse(s).unwrap();
        assert_eq!(parsed.to_string(), s);
    }

    #[test]
    fn test_parse_and_or_composites() {
        let and_str = "((TRUE) AND (VARIABLE var OF TYPE String IN TABLE table1 IS \"val\") AND (VARIABLE var OF TYPE Integer IN TABLE table2 < 42))";
        let parsed = parse(and_str).unwrap();
        assert!(matches!(parsed, LogicOperator::And(_)));
        assert_eq!(parsed.to_string(), and_str);

        let or_str = "((TRUE) OR (VARIABLE var OF TYPE String IN TABLE table1 IS \"val\") OR (VARIABLE var OF TYPE Integer IN TABLE table2 < 42))";
        let parsed = parse(or_str).unwrap();
        assert!(matches!(parsed, LogicOperator::Or(_)));
        assert_eq!(parsed.to_string(), or_str);
    }

    #[test]
    fn test_mixed_and_or_rejected() {
        assert!(parse("((TRUE) AND (TRUE) OR (TRUE))").is_err());
    }

    #[test]
    fn test_missing_opening_paren_rejected() {
        assert!(parse("invalid").is_err());
    }

    #[test]
    fn test_invalid_atomic_rejected() {
        assert!(parse("(invalid)").is_err());
    }

    #[test]
    fn test_get_required_data_merges_across_composites() {
        let s = "((NOT (VARIABLE var1 OF TYPE Integer IN TABLE table1 IN [3, weirdButValid])) AND ((TRUE) AND (NOT ((TRUE) OR (VARIABLE var OF TYPE String IN TABLE table IS \"val\")))) AND ((VARIABLE var2 OF TYPE String IN TABLE table2 IS \"val\") OR (VARIABLE var3 OF TYPE Integer IN TABLE table3 < 42)))";
        let parsed = parse(s).unwrap();
        let required = parsed.get_required_data();
        assert!(required.contains_key("table1"));
        assert!(required.contains_key("table2"));
        assert!(required.contains_key("table3"));
        assert!(required.contains_key("table"));
    }

    #[test]
    fn test_aggregator_operator_round_trip() {
        let s = "(AGGREGATE COUNT VARIABLE var1 OF TYPE String IN TABLE table1 >= 42)";
        let parsed = parse(s).unwrap();
        assert_eq!(parsed.to_string(), s);
    }

    #[test]
    fn test_aggregator_operator_string_compare_round_trip() {
        let s = "(AGGREGATE CONCATENATE VARIABLE var1 OF TYPE String IN TABLE table1 CONTAINS \"text with whitespace\")";
        let parsed = parse(s).unwrap();
        assert_eq!(parsed.to_string(), s);
    }

    #[test]
    fn test_aggregator_numeric_stat_rejects_string_compare() {
        let result = LogicOperator::aggregator(
            "table",
            "var",
            Value::Str("val".into()),
            DataType::Decimal,
            AggregatorType::Min,
            CompareOperator::String(StringOperatorType::Contains),
        );
        assert!(result.is_err());
    }
}
