//! Dependency ordering of records ahead of validation.

use crate::error::SchedulingError;
use crate::record::ResolvedRecord;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Default, Clone, Copy)]
pub struct UpdateScheduler;

impl UpdateScheduler {
    /// Indices of `records`, dependencies first. Independent records keep
    /// their input order.
    pub fn schedule(&self, records: &[ResolvedRecord]) -> Result<Vec<usize>, SchedulingError> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            if index.insert(record.key.as_str(), i).is_some() {
                return Err(SchedulingError::DuplicateKey(record.key.clone()));
            }
        }

        let mut pending = vec![0usize; records.len()];
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
        for (i, record) in records.iter().enumerate() {
            for dep in &record.depends_on {
                let &d = index
                    .get(dep.as_str())
                    .ok_or_else(|| SchedulingError::UnknownDependency {
                        record: record.key.clone(),
                        missing: dep.clone(),
                    })?;
                pending[i] += 1;
                dependents[d].push(i);
            }
        }

        let mut ready: BTreeSet<usize> = (0..records.len()).filter(|&i| pending[i] == 0).collect();
        let mut order = Vec::with_capacity(records.len());
        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &dependent in &dependents[next] {
                pending[dependent] -= 1;
                if pending[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < records.len() {
            let stuck = (0..records.len())
                .filter(|&i| pending[i] > 0)
                .map(|i| records[i].key.clone())
                .collect();
            return Err(SchedulingError::Cycle(stuck));
        }
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kgrecon_model::Judgment;

    fn rec(key: &str, deps: &[&str]) -> ResolvedRecord {
        let mut r = ResolvedRecord::new(key, None, Judgment::New);
        r.depends_on = deps.iter().map(|d| d.to_string()).collect();
        r
    }

    #[test]
    fn test_independent_records_keep_order() {
        let records = vec![rec("a", &[]), rec("b", &[]), rec("c", &[])];
        assert_eq!(UpdateScheduler.schedule(&records).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_dependencies_come_first() {
        let records = vec![rec("a", &["c"]), rec("b", &[]), rec("c", &["b"])];
        assert_eq!(UpdateScheduler.schedule(&records).unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let records = vec![rec("a", &["b"]), rec("b", &["a"]), rec("c", &[])];
        let err = UpdateScheduler.schedule(&records).unwrap_err();
        assert_eq!(err, SchedulingError::Cycle(vec!["a".into(), "b".into()]));
    }

    #[test]
    fn test_unknown_dependency_is_reported() {
        let records = vec![rec("a", &["zzz"])];
        assert!(matches!(
            UpdateScheduler.schedule(&records),
            Err(SchedulingError::UnknownDependency { .. })
        ));
    }

    #[test]
    fn test_duplicate_key_is_reported() {
        let records = vec![rec("a", &[]), rec("a", &[])];
        assert_eq!(
            UpdateScheduler.schedule(&records).unwrap_err(),
            SchedulingError::DuplicateKey("a".into())
        );
    }
}
