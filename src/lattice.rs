//! The table lattice (§4.1): the DAG of tables induced by foreign-key declarations.
//!
//! An edge `parent -> child` exists whenever `parent` declares a foreign-key variable
//! referencing `child`'s primary key. A *minimal* table (no incoming edges) is never
//! referenced by anyone else's foreign key — typically a root/fact table. A *maximal*
//! table (no outgoing edges) declares no foreign keys of its own — typically a pure
//! dimension table. Descent follows edges outward from a root toward the tables it can
//! join to; ancestry is the dual, walking edges backward.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{CoreError, CoreResult};
use crate::types::MetaData;

/// The DAG of tables induced by foreign keys in a [`MetaData`] instance.
#[derive(Debug, Clone)]
pub struct TableLattice {
    /// table -> tables it declares a foreign key toward.
    forward: HashMap<String, HashSet<String>>,
    /// table -> tables that declare a foreign key toward it.
    backward: HashMap<String, HashSet<String>>,
    all_tables: HashSet<String>,
}

impl TableLattice {
    /// Builds the lattice from a metadata instance's declared foreign keys.
    pub fn build(meta: &MetaData) -> Self {
        let mut forward: HashMap<String, HashSet<String>> = HashMap::new();
        let mut backward: HashMap<String, HashSet<String>> = HashMap::new();
        let mut all_tables = HashSet::new();

        for name in meta.table_names() {
            all_tables.insert(name.to_string());
            forward.entry(name.to_string()).or_default();
            backward.entry(name.to_string()).or_default();
        }

        for (name, info) in &meta.tables {
            for referenced in info.foreign_keys.values() {
                forward.entry(name.clone()).or_default().insert(referenced.clone());
                backward
                    .entry(referenced.clone())
                    .or_default()
                    .insert(name.clone());
            }
        }

        Self {
            forward,
            backward,
            all_tables,
        }
    }

    /// Tables that declare no foreign key of their own.
    pub fn maximal_elements(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .all_tables
            .iter()
            .filter(|t| self.forward.get(*t).map(|s| s.is_empty()).unwrap_or(true))
            .cloned()
            .collect();
        out.sort();
        out
    }

    /// Tables that no other table's foreign key references — root/fact tables.
    pub fn minimal_elements(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .all_tables
            .iter()
            .filter(|t| self.backward.get(*t).map(|s| s.is_empty()).unwrap_or(true))
            .cloned()
            .collect();
        out.sort();
        out
    }

    fn bfs(
        &self,
        seeds: &[String],
        edges: &HashMap<String, HashSet<String>>,
    ) -> HashMap<String, usize> {
        self.bfs_excluding(seeds, edges, None)
    }

    /// Like [`Self::bfs`], but a table in `blacklist` (and so its entire subtree) is
    /// never visited or counted.
    fn bfs_excluding(
        &self,
        seeds: &[String],
        edges: &HashMap<String, HashSet<String>>,
        blacklist: Option<&HashSet<String>>,
    ) -> HashMap<String, usize> {
        // maps reached table -> number of distinct seeds from which it is reachable
        // (used by multi-reference detection); BFS per seed keeps paths independent.
        let mut reach_count: HashMap<String, usize> = HashMap::new();
        for seed in seeds {
            if blacklist.map(|b| b.contains(seed)).unwrap_or(false) {
                continue;
            }
            let mut seen = HashSet::new();
            let mut queue = VecDeque::new();
            queue.push_back(seed.clone());
            seen.insert(seed.clone());
            while let Some(current) = queue.pop_front() {
                if let Some(next) = edges.get(&current) {
                    for n in next {
                        if blacklist.map(|b| b.contains(n)).unwrap_or(false) {
                            continue;
                        }
                        if seen.insert(n.clone()) {
                            queue.push_back(n.clone());
                        }
                    }
                }
            }
            for t in seen {
                *reach_count.entry(t).or_insert(0) += 1;
            }
        }
        reach_count
    }

    /// Prunes `reached` down to the tables that lie on some path from a seed to a
    /// whitelisted table: a reverse BFS from the whitelist, walking `edges` backward,
    /// restricted to `reached`. A table not on any such path is dropped even if it was
    /// itself reachable.
    fn restrict_to_whitelist(
        &self,
        reached: &HashSet<String>,
        edges: &HashMap<String, HashSet<String>>,
        whitelist: &HashSet<String>,
    ) -> HashSet<String> {
        let mut reverse: HashMap<String, Vec<String>> = HashMap::new();
        for (from, tos) in edges {
            if !reached.contains(from) {
                continue;
            }
            for to in tos {
                if reached.contains(to) {
                    reverse.entry(to.clone()).or_default().push(from.clone());
                }
            }
        }

        let mut keep: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        for w in whitelist {
            if reached.contains(w) && keep.insert(w.clone()) {
                queue.push_back(w.clone());
            }
        }
        while let Some(current) = queue.pop_front() {
            if let Some(preds) = reverse.get(&current) {
                for p in preds {
                    if keep.insert(p.clone()) {
                        queue.push_back(p.clone());
                    }
                }
            }
        }
        keep
    }

    /// Computes a sub-lattice rooted at `seeds`, optionally restricted to a `whitelist`
    /// (keeping only tables on a path from a seed to a whitelisted table; every
    /// whitelisted table must itself be reachable) or excluding a `blacklist` (dropping
    /// a blacklisted table and its entire subtree before anything else runs). §4.1.
    fn sub_lattice(
        &self,
        seeds: &[String],
        edges: &HashMap<String, HashSet<String>>,
        whitelist: Option<&HashSet<String>>,
        blacklist: Option<&HashSet<String>>,
    ) -> CoreResult<HashSet<String>> {
        for seed in seeds {
            // A seed must not be reachable from another seed.
            for other in seeds {
                if other == seed {
                    continue;
                }
                let other_reach = self.bfs(std::slice::from_ref(other), edges);
                if other_reach.contains_key(seed) {
                    return Err(CoreError::validation_unscoped(format!(
                        "table {seed} is itself reachable from seed {other}; seeds must be independent roots"
                    )));
                }
            }
        }

        let reach_count = self.bfs_excluding(seeds, edges, blacklist);
        let mut reached: HashSet<String> = reach_count.keys().cloned().collect();

        if let Some(whitelist) = whitelist {
            for req in whitelist {
                if !reached.contains(req) {
                    return Err(CoreError::validation_unscoped(format!(
                        "required table {req} is not reachable from the given seeds"
                    )));
                }
            }
            reached = self.restrict_to_whitelist(&reached, edges, whitelist);
        }

        Ok(reached)
    }

    /// Tables reachable from `seeds` by following foreign-key edges outward, optionally
    /// restricted to a `whitelist` or excluding a `blacklist` (§4.1). Fails if any
    /// whitelisted table is not reached, or if a seed is itself a descendant of another
    /// seed.
    pub fn descendants(
        &self,
        seeds: &[String],
        whitelist: Option<&HashSet<String>>,
        blacklist: Option<&HashSet<String>>,
    ) -> CoreResult<HashSet<String>> {
        self.sub_lattice(seeds, &self.forward, whitelist, blacklist)
    }

    /// Dual of [`Self::descendants`]: tables reachable from `seeds` by following
    /// foreign-key edges backward (i.e. tables that declare a path of foreign keys down
    /// to one of the seeds), with the same whitelist/blacklist restriction (§4.1).
    pub fn ancestors(
        &self,
        seeds: &[String],
        whitelist: Option<&HashSet<String>>,
        blacklist: Option<&HashSet<String>>,
    ) -> CoreResult<HashSet<String>> {
        self.sub_lattice(seeds, &self.backward, whitelist, blacklist)
    }

    /// A table is multi-referenced within the descendant sub-lattice of `seeds` if it is
    /// reachable via more than one distinct seed-rooted path (§4.1); used to warn callers
    /// that naive aggregation through it could double-count rows.
    pub fn multi_referenced_descendants(&self, seeds: &[String]) -> HashSet<String> {
        self.bfs(seeds, &self.forward)
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(t, _)| t)
            .collect()
    }

    /// Transitive closure of an inheritance mapping (`table -> inherited-from table`)
    /// rooted at `root`, returned in topological order (root-most first) so a
    /// transformer can process target tables in dependency order (§4.8).
    pub fn inheritance_order(
        &self,
        root: &str,
        inherits_from: &HashMap<String, String>,
    ) -> CoreResult<Vec<String>> {
        // Build children-of map from the inheritance relation.
        let mut children: HashMap<String, Vec<String>> = HashMap::new();
        for (child, parent) in inherits_from {
            children.entry(parent.clone()).or_default().push(child.clone());
        }
        for list in children.values_mut() {
            list.sort();
        }

        let mut order = vec![root.to_string()];
        let mut queue = VecDeque::new();
        queue.push_back(root.to_string());
        let mut visited = HashSet::new();
        visited.insert(root.to_string());

        while let Some(current) = queue.pop_front() {
            if let Some(kids) = children.get(&current) {
                for kid in kids {
                    if !visited.insert(kid.clone()) {
                        return Err(CoreError::validation_unscoped(format!(
                            "inheritance cycle detected at table {kid}"
                        )));
                    }
                    order.push(kid.clone());
                    queue.push_back(kid.clone());
                }
            }
        }

        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, TableInfo, VariableInfo, VariableType};

    fn meta_chain() -> MetaData {
        // visits --(PATIENT_ID)--> patients --(HOSPITAL_ID)--> hospitals
        let mut meta = MetaData::new();

        let mut hospitals = TableInfo::new("hospitals");
        let mut hpk = VariableInfo::new("HOSPITAL_ID", "hospitals", DataType::Integer);
        hpk.variable_type = VariableType::PrimaryKey;
        hospitals.primary_key = Some("HOSPITAL_ID".into());
        hospitals.variables.insert("HOSPITAL_ID".into(), hpk);
        meta.insert_table("hospitals", hospitals);

        let mut patients = TableInfo::new("patients");
        let mut ppk = VariableInfo::new("PATIENT_ID", "patients", DataType::Integer);
        ppk.variable_type = VariableType::PrimaryKey;
        patients.primary_key = Some("PATIENT_ID".into());
        patients.variables.insert("PATIENT_ID".into(), ppk);
        let mut hfk = VariableInfo::new("HOSPITAL_ID", "patients", DataType::Integer);
        hfk.variable_type = VariableType::ForeignKey;
        patients.foreign_keys.insert("HOSPITAL_ID".into(), "hospitals".into());
        patients.variables.insert("HOSPITAL_ID".into(), hfk);
        meta.insert_table("patients", patients);

        let mut visits = TableInfo::new("visits");
        let mut vpk = VariableInfo::new("VISIT_ID", "visits", DataType::Integer);
        vpk.variable_type = VariableType::PrimaryKey;
        visits.primary_key = Some("VISIT_ID".into());
        visits.variables.insert("VISIT_ID".into(), vpk);
        let mut pfk = VariableInfo::new("PATIENT_ID", "visits", DataType::Integer);
        pfk.variable_type = VariableType::ForeignKey;
        visits.foreign_keys.insert("PATIENT_ID".into(), "patients".into());
        visits.variables.insert("PATIENT_ID".into(), pfk);
        meta.insert_table("visits", visits);

        meta
    }

    #[test]
    fn test_minimal_and_maximal_elements() {
        let lattice = TableLattice::build(&meta_chain());
        assert_eq!(lattice.minimal_elements(), vec!["visits".to_string()]);
        assert_eq!(lattice.maximal_elements(), vec!["hospitals".to_string()]);
    }

    #[test]
    fn test_descendants_superset_of_seeds() {
        let lattice = TableLattice::build(&meta_chain());
        let seeds = vec!["visits".to_string()];
        let descendants = lattice.descendants(&seeds, None, None).unwrap();
        assert!(descendants.contains("visits"));
        assert!(descendants.contains("patients"));
        assert!(descendants.contains("hospitals"));
    }

    #[test]
    fn test_descendants_and_ancestors_are_inverse() {
        let lattice = TableLattice::build(&meta_chain());
        let from_visits = lattice
            .descendants(&["visits".to_string()], None, None)
            .unwrap();
        let from_hospitals = lattice
            .ancestors(&["hospitals".to_string()], None, None)
            .unwrap();
        assert_eq!(from_visits, from_hospitals);
    }

    #[test]
    fn test_required_table_not_reached_fails() {
        let lattice = TableLattice::build(&meta_chain());
        let mut required = HashSet::new();
        required.insert("does_not_exist".to_string());
        let result = lattice.descendants(&["visits".to_string()], Some(&required), None);
        assert!(result.is_err());
    }

    #[test]
    fn test_seed_reachable_from_other_seed_fails() {
        let lattice = TableLattice::build(&meta_chain());
        let seeds = vec!["visits".to_string(), "patients".to_string()];
        assert!(lattice.descendants(&seeds, None, None).is_err());
    }

    /// Builds the 5-table lattice used by the reference whitelist/blacklist
    /// sub-lattice tests: two roots sharing a child, which in turn has its own child.
    fn meta_diamond() -> MetaData {
        // first_root_table --> first_child_table --> third_child_table
        // first_root_table --> second_child_table
        // second_root_table --> first_child_table
        let mut meta = MetaData::new();
        for t in [
            "first_root_table",
            "second_root_table",
            "first_child_table",
            "second_child_table",
            "third_child_table",
        ] {
            let mut table = TableInfo::new(t);
            let mut pk = VariableInfo::new(format!("{t}_ID"), t, DataType::Integer);
            pk.variable_type = VariableType::PrimaryKey;
            table.primary_key = Some(format!("{t}_ID"));
            table.variables.insert(format!("{t}_ID"), pk);
            meta.insert_table(t, table);
        }
        for (referer, var, target) in [
            ("first_root_table", "FIRST_CHILD_ID", "first_child_table"),
            ("first_root_table", "SECOND_CHILD_ID", "second_child_table"),
            ("second_root_table", "FIRST_CHILD_ID", "first_child_table"),
            ("first_child_table", "THIRD_CHILD_ID", "third_child_table"),
        ] {
            let table = meta.tables.get_mut(referer).unwrap();
            let mut fk = VariableInfo::new(var, referer, DataType::Integer);
            fk.variable_type = VariableType::ForeignKey;
            table.foreign_keys.insert(var.into(), target.into());
            table.variables.insert(var.into(), fk);
        }
        meta
    }

    #[test]
    fn test_whitelist_rejects_unreachable_required_table() {
        let lattice = TableLattice::build(&meta_diamond());
        let mut whitelist = HashSet::new();
        whitelist.insert("first_child_table".to_string());
        whitelist.insert("second_child_table".to_string());
        let result = lattice.descendants(&["first_child_table".to_string()], Some(&whitelist), None);
        assert!(result.is_err());
    }

    #[test]
    fn test_whitelist_prunes_unlisted_reachable_tables() {
        let lattice = TableLattice::build(&meta_diamond());
        let mut whitelist = HashSet::new();
        whitelist.insert("first_child_table".to_string());
        let sub = lattice
            .descendants(&["first_child_table".to_string()], Some(&whitelist), None)
            .unwrap();
        // third_child_table is reachable but not whitelisted, so it is pruned away.
        assert_eq!(sub, HashSet::from(["first_child_table".to_string()]));
    }

    #[test]
    fn test_whitelist_keeps_connecting_tables_on_path_to_required() {
        let lattice = TableLattice::build(&meta_diamond());
        let mut whitelist = HashSet::new();
        whitelist.insert("third_child_table".to_string());
        whitelist.insert("second_child_table".to_string());
        let sub = lattice
            .descendants(
                &["first_root_table".to_string(), "second_root_table".to_string()],
                Some(&whitelist),
                None,
            )
            .unwrap();
        // Neither root nor first_child_table is whitelisted directly, but both lie on a
        // path to a whitelisted table, so the full lattice survives unpruned.
        assert_eq!(
            sub,
            HashSet::from([
                "first_root_table".to_string(),
                "second_root_table".to_string(),
                "first_child_table".to_string(),
                "second_child_table".to_string(),
                "third_child_table".to_string(),
            ])
        );
    }

    #[test]
    fn test_blacklist_excludes_table_and_its_subtree() {
        let lattice = TableLattice::build(&meta_diamond());
        let mut blacklist = HashSet::new();
        blacklist.insert("second_child_table".to_string());
        let sub = lattice
            .descendants(&["first_root_table".to_string()], None, Some(&blacklist))
            .unwrap();
        assert_eq!(
            sub,
            HashSet::from([
                "first_root_table".to_string(),
                "first_child_table".to_string(),
                "third_child_table".to_string(),
            ])
        );
    }

    #[test]
    fn test_multi_referenced_detection() {
        // orders and invoices both reference customers; customers is multi-referenced
        // from a single seed `root` that references both.
        let mut meta = MetaData::new();
        for t in ["customers", "orders", "invoices", "root"] {
            let mut table = TableInfo::new(t);
            let mut pk = VariableInfo::new(format!("{t}_ID"), t, DataType::Integer);
            pk.variable_type = VariableType::PrimaryKey;
            table.primary_key = Some(format!("{t}_ID"));
            table.variables.insert(format!("{t}_ID"), pk);
            meta.insert_table(t, table);
        }
        for referer in ["orders", "invoices"] {
            let table = meta.tables.get_mut(referer).unwrap();
            let mut fk = VariableInfo::new("CUSTOMER_ID", referer, DataType::Integer);
            fk.variable_type = VariableType::ForeignKey;
            table.foreign_keys.insert("CUSTOMER_ID".into(), "customers".into());
            table.variables.insert("CUSTOMER_ID".into(), fk);
        }
        let root = meta.tables.get_mut("root").unwrap();
        for (var, target) in [("ORDERS_ID", "orders"), ("INVOICES_ID", "invoices")] {
            let mut fk = VariableInfo::new(var, "root", DataType::Integer);
            fk.variable_type = VariableType::ForeignKey;
            root.foreign_keys.insert(var.into(), target.into());
            root.variables.insert(var.into(), fk);
        }

        let lattice = TableLattice::build(&meta);
        let multi = lattice.multi_referenced_descendants(&["root".to_string()]);
        assert!(multi.contains("customers"));
        assert!(!multi.contains("orders"));
    }

    #[test]
    fn test_inheritance_order_topological() {
        let lattice = TableLattice::build(&meta_chain());
        let mut inherits = HashMap::new();
        inherits.insert("child".to_string(), "root".to_string());
        inherits.insert("grandchild".to_string(), "child".to_string());
        let order = lattice.inheritance_order("root", &inherits).unwrap();
        assert_eq!(order, vec!["root", "child", "grandchild"]);
    }

    #[test]
    fn test_inheritance_cycle_detected() {
        let lattice = TableLattice::build(&meta_chain());
        let mut inherits = HashMap::new();
        inherits.insert("root".to_string(), "child".to_string());
        inherits.insert("child".to_string(), "root".to_string());
        assert!(lattice.inheritance_order("root", &inherits).is_err());
    }
}
