use attrkit_core::logic::{parse_logic_operator as parse, LogicOperator, MetricOperatorType};
use attrkit_core::types::{DataType, Value};

fn atom(variable: &str, larger_than: i64) -> LogicOperator {
    LogicOperator::Metric {
        table: "t".to_string(),
        variable: variable.to_string(),
        value: Value::Int(larger_than),
        data_type: DataType::Integer,
        compare: MetricOperatorType::Smaller,
    }
}

#[test]
fn single_atom_prints_and_parses_byte_identical() {
    let expr = atom("a", 5);
    let text = expr.to_string();
    assert_eq!(text, "(VARIABLE a OF TYPE Integer IN TABLE t < 5)");
    let reparsed = parse(&text).unwrap();
    assert_eq!(reparsed, expr);
    assert_eq!(reparsed.to_string(), text);
}

#[test]
fn and_of_two_atoms_parses_with_or_without_explicit_inner_parens() {
    let expr = LogicOperator::And(vec![atom("a", 5), atom("b", 10)]);
    let flat_text = expr.to_string();
    let reparsed = parse(&flat_text).unwrap();
    assert_eq!(reparsed, expr);

    // Explicit parens around each atom, still a single AND level.
    let explicit_text = format!("({} AND {})", atom("a", 5), atom("b", 10));
    let reparsed_explicit = parse(&explicit_text).unwrap();
    assert_eq!(reparsed_explicit, expr);
}

#[test]
fn and_or_as_direct_siblings_fails_to_parse() {
    let mixed = format!("({} AND {} OR {})", atom("a", 5), atom("b", 10), atom("c", 1));
    assert!(parse(&mixed).is_err());
}
