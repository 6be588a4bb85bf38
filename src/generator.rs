//! Metadata generation (§4.4–§4.5): inferring a draft [`MetaData`] from raw tabular
//! data, one table and variable at a time, for a human reviewer to refine.

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::cancel::CancellationToken;
use crate::error::{CoreError, CoreResult};
use crate::io::RowSource;
use crate::types::{
    Binning, DataType, DataTypeDistribution, MetaData, TableInfo, ValueDistribution, VariableInfo, VariableType,
};

/// Controls how aggressively [`detect_artifacts_and_value_distribution`] flags raw
/// values as artifacts (noise values that do not fit the variable's declared type).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactMode {
    /// Never flag artifacts; every raw value is taken at face value.
    NoArtifacts,
    /// Flag only values that fail to cast to the variable's data type.
    OnlyDataTypeMismatch,
    /// Flag cast failures and, for metric variables, statistical outliers that occur
    /// exactly once beyond the 1.5*IQR Tukey fence.
    DataTypeMismatchAndOutliers,
}

/// Tunables for [`gather_meta_data`] (§4.5, §4.14). Defaults match the numeric values
/// named in the specification.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// A numeric variable with more distinct non-missing values than this is `Metric`
    /// rather than `Categorical`.
    pub categorical_threshold: usize,
    /// A `Metric` variable with more distinct non-missing values than this gets
    /// `binning.should_bin = true`.
    pub binning_threshold: usize,
    /// A string variable whose values average longer than this is recognized as free
    /// text and gets no categorical distribution.
    pub str_len_free_text: usize,
    /// Raw cell strings treated as "no value present" rather than a real category.
    pub missing_value_literals: Vec<String>,
    pub artifact_mode: ArtifactMode,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            categorical_threshold: 20,
            binning_threshold: 20,
            str_len_free_text: 300,
            missing_value_literals: vec!["".to_string(), "NaN".to_string(), "NA".to_string(), "nan".to_string()],
            artifact_mode: ArtifactMode::OnlyDataTypeMismatch,
        }
    }
}

fn is_missing(raw: &str, missing_literals: &[String]) -> bool {
    missing_literals.iter().any(|lit| lit == raw)
}

pub(crate) fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = pos - lower as f64;
        sorted[lower] + (sorted[upper] - sorted[lower]) * frac
    }
}

/// Computes the data-type distribution, artifact list and value distribution for one
/// variable from its raw-value frequency table (§3.3, §4.5).
///
/// `free_text` suppresses the categorical distribution for a `String` variable whose
/// values are recognized as free text rather than a bounded set of categories.
pub fn detect_artifacts_and_value_distribution(
    value_counts: &IndexMap<String, usize>,
    data_type: DataType,
    artifact_mode: ArtifactMode,
    missing_literals: &[String],
    free_text: bool,
) -> (Option<Vec<String>>, ValueDistribution, DataTypeDistribution) {
    let total: usize = value_counts.values().sum();
    let mut missing_count = 0usize;
    let mut string_count = 0usize;
    let mut int_count = 0usize;
    let mut dec_count = 0usize;

    for (raw, count) in value_counts {
        if is_missing(raw, missing_literals) {
            missing_count += count;
            continue;
        }
        string_count += count;
        if DataType::Integer.cast(raw).is_some() {
            int_count += count;
        }
        if DataType::Decimal.cast(raw).is_some() {
            dec_count += count;
        }
    }

    let non_missing = total.saturating_sub(missing_count).max(1);
    let data_type_distribution = DataTypeDistribution {
        string: string_count as f64 / non_missing as f64,
        integer: int_count as f64 / non_missing as f64,
        decimal: dec_count as f64 / non_missing as f64,
    };

    let mut artifacts: Vec<String> = Vec::new();
    let mut artifact_count = 0usize;

    match data_type {
        DataType::String => {
            let mut entries: Vec<(&String, &usize)> = value_counts
                .iter()
                .filter(|(raw, _)| !is_missing(raw, missing_literals))
                .collect();
            entries.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));

            // §3.3: only retained when the top 10 sum to >= 50% of non-missing values;
            // free text never gets a categorical distribution at all.
            let top_ten_sum: usize = entries.iter().take(10).map(|(_, c)| **c).sum();
            let keep_distribution = !free_text && non_missing > 0 && top_ten_sum * 2 >= non_missing;

            if !keep_distribution {
                return (
                    None,
                    ValueDistribution::Categorical {
                        category_counts: IndexMap::new(),
                        other_count: non_missing,
                        missing_count,
                        artifact_count: 0,
                    },
                    data_type_distribution,
                );
            }

            let mut category_counts = IndexMap::new();
            let mut other_count = 0usize;
            for (i, (raw, count)) in entries.into_iter().enumerate() {
                if i < 10 {
                    category_counts.insert(raw.clone(), *count);
                } else {
                    other_count += count;
                }
            }
            let dist = ValueDistribution::Categorical {
                category_counts,
                other_count,
                missing_count,
                artifact_count: 0,
            };
            (None, dist, data_type_distribution)
        }
        DataType::Integer | DataType::Decimal => {
            let mut numeric: Vec<f64> = Vec::new();
            for (raw, count) in value_counts {
                if is_missing(raw, missing_literals) {
                    continue;
                }
                match data_type.cast(raw) {
                    Some(v) => {
                        let f = v.as_f64().expect("Integer/Decimal cast always yields a numeric Value");
                        for _ in 0..*count {
                            numeric.push(f);
                        }
                    }
                    None => {
                        artifact_count += count;
                        if artifact_mode != ArtifactMode::NoArtifacts {
                            artifacts.push(raw.clone());
                        }
                    }
                }
            }
            numeric.sort_by(|a, b| a.partial_cmp(b).unwrap());

            let q1 = quantile(&numeric, 0.25);
            let median = quantile(&numeric, 0.5);
            let q3 = quantile(&numeric, 0.75);
            let iqr = q3 - q1;
            let lower_fence = q1 - 1.5 * iqr;
            let upper_fence = q3 + 1.5 * iqr;

            let mut outliers = Vec::new();
            for (raw, count) in value_counts {
                if is_missing(raw, missing_literals) || *count != 1 {
                    continue;
                }
                let Some(v) = data_type.cast(raw) else { continue };
                let Some(f) = v.as_f64() else { continue };
                if f < lower_fence || f > upper_fence {
                    outliers.push(v.clone());
                    if artifact_mode == ArtifactMode::DataTypeMismatchAndOutliers {
                        artifacts.push(raw.clone());
                        artifact_count += 1;
                    }
                }
            }

            let dist = ValueDistribution::Metric {
                median,
                q1,
                q3,
                lower_fence,
                upper_fence,
                outliers,
                missing_count,
                artifact_count,
            };
            let artifacts_opt = match artifact_mode {
                ArtifactMode::NoArtifacts => None,
                _ if artifacts.is_empty() => None,
                _ => Some(artifacts),
            };
            (artifacts_opt, dist, data_type_distribution)
        }
    }
}

/// Generates a draft [`MetaData`] from every table a [`RowSource`] exposes.
///
/// Per table: detects a primary key (the unique, non-missing column, if any), then in a
/// second pass detects foreign keys (a non-primary column whose name matches another
/// table's primary-key variable name), classifies each remaining variable as `Metric` or
/// `Categorical` by distinct-value count against `config.categorical_threshold`, and
/// builds its artifact list and value distribution (§4.5).
///
/// Fails with [`CoreError::Schema`] if two rows of the same table declare different
/// column sets (§4.5's "schema mismatch").
pub fn gather_meta_data(
    source: &dyn RowSource,
    config: &GeneratorConfig,
    cancel: &CancellationToken,
) -> CoreResult<MetaData> {
    let mut meta = MetaData::new();
    let mut pk_by_table: IndexMap<String, Option<String>> = IndexMap::new();

    for table_name in source.table_names() {
        cancel.check()?;
        let mut value_counts: IndexMap<String, IndexMap<String, usize>> = IndexMap::new();
        let mut column_order: Vec<String> = Vec::new();
        let mut header_columns: Option<HashSet<String>> = None;
        let mut row_count = 0usize;

        source.for_each_row(&table_name, &mut |row| {
            row_count += 1;
            let columns: HashSet<String> = row.keys().cloned().collect();
            match &header_columns {
                None => header_columns = Some(columns),
                Some(expected) if *expected != columns => {
                    return Err(CoreError::schema(
                        table_name.clone(),
                        "row's column set does not match the header established by the first row",
                    ));
                }
                Some(_) => {}
            }
            for (var, raw) in row {
                if !value_counts.contains_key(var) {
                    column_order.push(var.clone());
                }
                *value_counts
                    .entry(var.clone())
                    .or_default()
                    .entry(raw.clone())
                    .or_insert(0) += 1;
            }
            Ok(())
        })?;

        let mut table_info = TableInfo::new(&table_name);
        let mut pk_candidate: Option<String> = None;

        for var_name in &column_order {
            cancel.check()?;
            let counts = &value_counts[var_name];
            let distinct_non_missing: usize = counts
                .keys()
                .filter(|k| !is_missing(k, &config.missing_value_literals))
                .count();
            let total_non_missing: usize = counts
                .iter()
                .filter(|(k, _)| !is_missing(k, &config.missing_value_literals))
                .map(|(_, c)| *c)
                .sum();
            let is_unique = row_count > 0 && distinct_non_missing == total_non_missing && total_non_missing == row_count;

            let dominant_type = {
                let (_, _, dist) = detect_artifacts_and_value_distribution(
                    counts,
                    DataType::Decimal,
                    ArtifactMode::NoArtifacts,
                    &config.missing_value_literals,
                    false,
                );
                if dist.integer >= 0.999 {
                    DataType::Integer
                } else if dist.decimal >= 0.999 {
                    DataType::Decimal
                } else {
                    DataType::String
                }
            };

            let free_text = dominant_type == DataType::String && {
                let non_missing: Vec<&String> = counts
                    .keys()
                    .filter(|k| !is_missing(k, &config.missing_value_literals))
                    .collect();
                !non_missing.is_empty()
                    && non_missing.iter().map(|s| s.chars().count()).sum::<usize>() / non_missing.len()
                        > config.str_len_free_text
            };

            let (artifacts, value_distribution, data_type_distribution) = detect_artifacts_and_value_distribution(
                counts,
                dominant_type,
                config.artifact_mode,
                &config.missing_value_literals,
                free_text,
            );

            let mut info = VariableInfo::new(var_name.clone(), table_name.clone(), dominant_type);
            info.artifacts = artifacts;
            info.value_distribution = Some(value_distribution);
            info.data_type_distribution = Some(data_type_distribution);

            let is_numeric_dominant = dominant_type != DataType::String;
            if pk_candidate.is_none() && is_unique {
                pk_candidate = Some(var_name.clone());
                info.variable_type = VariableType::PrimaryKey;
            } else if is_numeric_dominant && distinct_non_missing > config.categorical_threshold {
                info.variable_type = VariableType::Metric;
                info.binning = Some(Binning {
                    should_bin: distinct_non_missing > config.binning_threshold,
                    ref_low: None,
                    ref_high: None,
                    exclude_from_binning: Vec::new(),
                });
            } else {
                info.variable_type = VariableType::Categorical;
            }

            table_info.variables.insert(var_name.clone(), info);
        }

        if let Some(pk) = &pk_candidate {
            table_info.primary_key = Some(pk.clone());
        }
        pk_by_table.insert(table_name.clone(), pk_candidate);
        meta.insert_table(table_name, table_info);
    }

    // Second pass (§4.5 step 2): a non-primary column whose name matches another
    // table's primary-key variable name becomes a foreign key referencing that table.
    let table_names: Vec<String> = meta.table_names().map(str::to_string).collect();
    for table_name in &table_names {
        cancel.check()?;
        let candidate_vars: Vec<String> = meta
            .table(table_name)
            .unwrap()
            .variables
            .keys()
            .filter(|v| pk_by_table.get(table_name).and_then(|pk| pk.as_deref()) != Some(v.as_str()))
            .cloned()
            .collect();
        for var_name in candidate_vars {
            for (other_table, other_pk) in &pk_by_table {
                if other_table == table_name {
                    continue;
                }
                if other_pk.as_deref() == Some(var_name.as_str()) {
                    table_info_add_foreign_key(&mut meta, table_name, &var_name, other_table)?;
                    break;
                }
            }
        }
    }

    Ok(meta)
}

fn table_info_add_foreign_key(meta: &mut MetaData, table: &str, variable: &str, referenced_table: &str) -> CoreResult<()> {
    meta.table_mut(table)
        .expect("table just enumerated from meta")
        .add_foreign_key(variable, referenced_table)
}
