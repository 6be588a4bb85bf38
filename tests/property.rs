//! Property-based tests (§8): universally-quantified invariants rather than single
//! worked examples. Round-trip covers logical expressions (property 1); the rest cover
//! the table lattice (property 4).

use attrkit_core::logic::{parse_logic_operator as parse, LogicOperator, MetricOperatorType, StringOperatorType};
use attrkit_core::lattice::TableLattice;
use attrkit_core::types::{DataType, MetaData, TableInfo, Value, VariableInfo, VariableType};
use proptest::prelude::*;

fn arb_identifier() -> impl Strategy<Value = String> {
    "[a-zA-Z][a-zA-Z0-9_]{0,7}"
}

/// Values deliberately drawn from a charset that includes whitespace and commas, the two
/// characters `quote_if_whitespace` must escape for the round-trip to hold.
fn arb_token_value() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ,]{0,10}"
}

fn arb_string_atom() -> impl Strategy<Value = LogicOperator> {
    (
        arb_identifier(),
        arb_identifier(),
        "[a-zA-Z0-9]{0,10}",
        prop_oneof![
            Just(StringOperatorType::Equals),
            Just(StringOperatorType::Contains),
            Just(StringOperatorType::UnequalTo),
        ],
    )
        .prop_map(|(table, variable, value, compare)| LogicOperator::String {
            table,
            variable,
            value,
            compare,
        })
}

fn arb_metric_atom() -> impl Strategy<Value = LogicOperator> {
    (
        arb_identifier(),
        arb_identifier(),
        any::<i32>(),
        prop_oneof![
            Just(MetricOperatorType::Equals),
            Just(MetricOperatorType::Smaller),
            Just(MetricOperatorType::Larger),
            Just(MetricOperatorType::SmallerOrEqual),
            Just(MetricOperatorType::LargerOrEqual),
        ],
    )
        .prop_map(|(table, variable, value, compare)| LogicOperator::Metric {
            table,
            variable,
            value: Value::Int(value as i64),
            data_type: DataType::Integer,
            compare,
        })
}

fn arb_in_list_atom() -> impl Strategy<Value = LogicOperator> {
    (
        arb_identifier(),
        arb_identifier(),
        prop::collection::vec(arb_token_value(), 1..4),
    )
        .prop_map(|(table, variable, values)| LogicOperator::InList {
            table,
            variable,
            data_type: DataType::String,
            values: values.into_iter().map(Value::Str).collect(),
        })
}

fn arb_atom() -> impl Strategy<Value = LogicOperator> {
    prop_oneof![arb_string_atom(), arb_metric_atom(), arb_in_list_atom()]
}

proptest! {
    /// Property 1: `parse(print(x)) == x` for a single atom of every kind, including
    /// `InList` values that contain the comma the printer must quote around.
    #[test]
    fn atom_round_trips_through_print_and_parse(atom in arb_atom()) {
        let text = atom.to_string();
        let reparsed = parse(&text).unwrap();
        prop_assert_eq!(&reparsed, &atom);
        prop_assert_eq!(reparsed.to_string(), text);
    }

    /// Property 1, compound case: an `AND` of two atoms round-trips the same way.
    #[test]
    fn conjunction_round_trips_through_print_and_parse(a in arb_atom(), b in arb_atom()) {
        let expr = LogicOperator::And(vec![a, b]);
        let text = expr.to_string();
        let reparsed = parse(&text).unwrap();
        prop_assert_eq!(&reparsed, &expr);
        prop_assert_eq!(reparsed.to_string(), text);
    }
}

/// Builds a random forest-shaped foreign-key DAG over `table_0..table_{n-1}`: table `i`
/// may declare a foreign key to any table `j < i`, so the edges are acyclic by
/// construction.
fn random_lattice(edge_bits: &[bool], table_count: usize) -> (TableLattice, Vec<String>) {
    let names: Vec<String> = (0..table_count).map(|i| format!("table_{i}")).collect();
    let mut meta = MetaData::new();
    for name in &names {
        let mut table = TableInfo::new(name);
        let mut pk = VariableInfo::new(format!("{name}_PK"), name, DataType::Integer);
        pk.variable_type = VariableType::PrimaryKey;
        table.primary_key = Some(format!("{name}_PK"));
        table.variables.insert(format!("{name}_PK"), pk);
        meta.insert_table(name, table);
    }

    let mut bit = 0usize;
    for i in 0..table_count {
        for j in 0..i {
            let wants_edge = edge_bits.get(bit).copied().unwrap_or(false);
            bit += 1;
            if !wants_edge {
                continue;
            }
            let referer = &names[i];
            let referenced = &names[j];
            let fk_var = format!("{referenced}_FK");
            let table = meta.tables.get_mut(referer).unwrap();
            if table.foreign_keys.contains_key(&fk_var) {
                continue;
            }
            let mut fk = VariableInfo::new(&fk_var, referer, DataType::Integer);
            fk.variable_type = VariableType::ForeignKey;
            table.foreign_keys.insert(fk_var.clone(), referenced.clone());
            table.variables.insert(fk_var, fk);
        }
    }

    (TableLattice::build(&meta), names)
}

proptest! {
    /// Property 4: `descendants({s})` is always a superset of `{s}`.
    #[test]
    fn descendants_is_superset_of_seed(
        edge_bits in prop::collection::vec(any::<bool>(), 0..10),
        seed_idx in 0usize..5,
    ) {
        let table_count = 5;
        let (lattice, names) = random_lattice(&edge_bits, table_count);
        let seed = names[seed_idx % table_count].clone();
        let reached = lattice.descendants(&[seed.clone()], None, None).unwrap();
        prop_assert!(reached.contains(&seed));
    }

    /// Property 4: the descendant lattice of a seed and the ancestor lattice of that
    /// seed's reachable set agree from either direction (they are duals of each other).
    #[test]
    fn descendants_and_ancestors_agree_as_duals(
        edge_bits in prop::collection::vec(any::<bool>(), 0..10),
        seed_idx in 0usize..5,
    ) {
        let table_count = 5;
        let (lattice, names) = random_lattice(&edge_bits, table_count);
        let seed = names[seed_idx % table_count].clone();
        let descendants = lattice.descendants(&[seed.clone()], None, None).unwrap();

        // Every table reachable downward from `seed` must, read from its own
        // perspective, have `seed` reachable upward from it.
        for table in &descendants {
            let ancestors_of_table = lattice.ancestors(std::slice::from_ref(table), None, None).unwrap();
            prop_assert!(ancestors_of_table.contains(&seed));
        }
    }

    /// A whitelist restriction never grows the descendant set and never drops a
    /// whitelisted, reachable table.
    #[test]
    fn whitelist_restriction_is_a_subset_containing_the_whitelist(
        edge_bits in prop::collection::vec(any::<bool>(), 0..10),
        seed_idx in 0usize..5,
        keep_idx in 0usize..5,
    ) {
        let table_count = 5;
        let (lattice, names) = random_lattice(&edge_bits, table_count);
        let seed = names[seed_idx % table_count].clone();
        let full = lattice.descendants(&[seed.clone()], None, None).unwrap();

        let keep_name = names[keep_idx % table_count].clone();
        if full.contains(&keep_name) {
            let mut whitelist = std::collections::HashSet::new();
            whitelist.insert(keep_name.clone());
            let restricted = lattice.descendants(&[seed], Some(&whitelist), None).unwrap();
            prop_assert!(restricted.is_subset(&full));
            prop_assert!(restricted.contains(&keep_name));
        }
    }

    /// A blacklisted table never appears in its own descendant sub-lattice.
    #[test]
    fn blacklist_exclusion_removes_the_blacklisted_table(
        edge_bits in prop::collection::vec(any::<bool>(), 0..10),
        seed_idx in 0usize..5,
        drop_idx in 0usize..5,
    ) {
        let table_count = 5;
        let (lattice, names) = random_lattice(&edge_bits, table_count);
        let seed = names[seed_idx % table_count].clone();
        let drop_name = names[drop_idx % table_count].clone();
        prop_assume!(drop_name != seed);

        let mut blacklist = std::collections::HashSet::new();
        blacklist.insert(drop_name.clone());
        let restricted = lattice.descendants(&[seed], None, Some(&blacklist)).unwrap();
        prop_assert!(!restricted.contains(&drop_name));
    }
}
