use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Error, Result};

pub type TaskId = String;

#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub label: String,
    pub module: String,
    pub phase: String,
    /// Task ids or provide tokens that must finish first. A trailing `?`
    /// marks the dependency optional (ignored when nothing provides it).
    pub after: Vec<TaskId>,
    pub provides: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Plan {
    tasks: BTreeMap<TaskId, Task>,
}

impl Plan {
    pub fn add(&mut self, task: Task) -> Result<()> {
        if self.tasks.contains_key(&task.id) {
            return Err(Error::config(format!("duplicate task id '{}'", task.id)));
        }
        self.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    fn provides_index(&self) -> Result<BTreeMap<&str, &str>> {
        let mut out: BTreeMap<&str, &str> = BTreeMap::new();
        for (id, task) in &self.tasks {
            for p in &task.provides {
                if let Some(existing) = out.insert(p.as_str(), id.as_str()) {
                    return Err(Error::config(format!(
                        "provide token '{}' is produced by both '{}' and '{}'",
                        p, existing, id
                    )));
                }
            }
        }
        Ok(out)
    }

    fn resolve_dep<'a>(
        &'a self,
        provides: &BTreeMap<&'a str, &'a str>,
        dep: &'a str,
    ) -> Result<Option<&'a str>> {
        let (dep, optional) = match dep.strip_suffix('?') {
            Some(d) => (d, true),
            None => (dep, false),
        };
        if let Some((id, _)) = self.tasks.get_key_value(dep) {
            return Ok(Some(id.as_str()));
        }
        if let Some(&provider) = provides.get(dep) {
            return Ok(Some(provider));
        }
        if optional {
            Ok(None)
        } else {
            Err(Error::config(format!("unknown dependency '{}'", dep)))
        }
    }

    /// Topological order of the plan. Ties are broken by task id so the
    /// same plan always runs in the same order.
    pub fn ordered(&self) -> Result<Vec<&Task>> {
        let provides = self.provides_index()?;

        let mut incoming: BTreeMap<&str, usize> = BTreeMap::new();
        let mut outgoing: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();

        for (id, task) in &self.tasks {
            incoming.entry(id.as_str()).or_insert(0);
            outgoing.entry(id.as_str()).or_default();
            for dep in &task.after {
                let Some(dep_id) = self.resolve_dep(&provides, dep).map_err(|e| {
                    Error::config(format!(
                        "task '{}' has invalid dependency '{}': {}",
                        id, dep, e
                    ))
                })?
                else {
                    continue;
                };
                if outgoing.entry(dep_id).or_default().insert(id.as_str()) {
                    *incoming.entry(id.as_str()).or_insert(0) += 1;
                }
            }
        }

        let mut ready: BTreeSet<&str> = incoming
            .iter()
            .filter_map(|(k, v)| (*v == 0).then_some(*k))
            .collect();
        let mut out: Vec<&Task> = Vec::with_capacity(self.tasks.len());

        while let Some(n) = ready.pop_first() {
            if let Some(task) = self.tasks.get(n) {
                out.push(task);
            }
            if let Some(children) = outgoing.get(n) {
                for &m in children {
                    if let Some(slot) = incoming.get_mut(m) {
                        *slot -= 1;
                        if *slot == 0 {
                            ready.insert(m);
                        }
                    }
                }
            }
        }

        if out.len() != self.tasks.len() {
            let remaining: Vec<&str> = incoming
                .iter()
                .filter_map(|(k, v)| (*v > 0).then_some(*k))
                .collect();
            return Err(Error::config(format!(
                "task graph contains a cycle; remaining nodes: {}",
                remaining.join(", ")
            )));
        }

        Ok(out)
    }
}
