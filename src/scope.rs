//! Branch scoping for manager views.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{Personnel, Task};

/// Who is looking. Only a manager with a branch sees a narrowed view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeContext {
    #[serde(default)]
    pub branch_id: Option<String>,
    #[serde(default)]
    pub is_manager: bool,
}

impl ScopeContext {
    pub fn unrestricted() -> Self {
        Self::default()
    }

    pub fn branch_manager(branch_id: impl Into<String>) -> Self {
        Self {
            branch_id: Some(branch_id.into()),
            is_manager: true,
        }
    }

    /// The active branch filter, if any.
    pub fn branch(&self) -> Option<&str> {
        if self.is_manager {
            self.branch_id.as_deref()
        } else {
            None
        }
    }

    pub fn is_restricted(&self) -> bool {
        self.branch().is_some()
    }
}

/// Personnel and tasks after scoping.
#[derive(Debug, Clone, Default)]
pub struct ScopedCollections {
    pub personnel: BTreeMap<String, Personnel>,
    pub tasks: BTreeMap<String, Task>,
    pub restricted: bool,
}

impl ScopedCollections {
    pub fn contains_personnel(&self, id: &str) -> bool {
        self.personnel.contains_key(id)
    }
}

/// Narrow personnel and tasks to one branch. Total: an unmatched branch just
/// yields empty collections.
pub fn apply_scope(
    personnel: &BTreeMap<String, Personnel>,
    tasks: &BTreeMap<String, Task>,
    scope: &ScopeContext,
) -> ScopedCollections {
    let Some(branch) = scope.branch() else {
        return ScopedCollections {
            personnel: personnel.clone(),
            tasks: tasks.clone(),
            restricted: false,
        };
    };

    let scoped_personnel: BTreeMap<String, Personnel> = personnel
        .iter()
        .filter(|(_, p)| p.branch_id.as_deref() == Some(branch))
        .map(|(id, p)| (id.clone(), p.clone()))
        .collect();

    let scoped_tasks: BTreeMap<String, Task> = tasks
        .iter()
        .filter(|(_, t)| {
            t.personnel_id
                .as_deref()
                .map(|pid| scoped_personnel.contains_key(pid))
                .unwrap_or(false)
        })
        .map(|(id, t)| (id.clone(), t.clone()))
        .collect();

    ScopedCollections {
        personnel: scoped_personnel,
        tasks: scoped_tasks,
        restricted: true,
    }
}
