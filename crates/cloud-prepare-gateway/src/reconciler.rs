//! Presence-based reconciliation of managed rule sets.
//!
//! A rule group (security group, NSG) may hold rules this crate does not own.
//! Managed rules are recognised by a name prefix. Reconciliation is
//! all-or-nothing: if any rule with the prefix exists the set is considered
//! in place and nothing is changed; drift inside a managed set is not
//! repaired.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info};

use cloud_prepare_common::{Result, RuleGroup, SecurityRule};

/// Outcome of a reconcile call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// A mutating call was issued
    Applied,
    /// Already in the desired state
    Noop,
}

impl Reconciled {
    /// True when something changed
    pub fn is_applied(&self) -> bool {
        matches!(self, Reconciled::Applied)
    }
}

/// Storage of rule groups for one provider.
///
/// Implementations wrap provider errors with operation and resource context
/// and wait for any asynchronous provider operation to finish before
/// returning.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Fetch a group with all its rules; `None` if the group does not exist
    async fn fetch(&self, group: &str) -> Result<Option<RuleGroup>>;

    /// Create a group holding `group.rules`
    async fn create_group(&self, group: &RuleGroup) -> Result<()>;

    /// Replace the rules of an existing group with `group.rules`
    async fn replace_rules(&self, group: &RuleGroup) -> Result<()>;

    /// Delete a group
    async fn delete_group(&self, group: &str) -> Result<()>;
}

/// Reconciles managed rule sets inside a [`RuleStore`]
pub struct RuleReconciler<S> {
    store: S,
}

impl<S: RuleStore> RuleReconciler<S> {
    /// Create a reconciler over a store
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// The underlying store
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Make sure the rules carrying `prefix` exist in `group`.
    ///
    /// Unmanaged rules already in the group are kept ahead of the new ones.
    /// A missing group is created with just the desired rules.
    pub async fn ensure_rule_set(
        &self,
        group: &str,
        prefix: &str,
        desired: Vec<SecurityRule>,
    ) -> Result<Reconciled> {
        match self.store.fetch(group).await? {
            Some(existing) if existing.has_rules_with_prefix(prefix) => {
                debug!(group = %group, prefix = %prefix, "Managed rules already present");
                Ok(Reconciled::Noop)
            }
            Some(mut existing) => {
                existing.rules.extend(desired);
                self.store.replace_rules(&existing).await?;
                info!(group = %group, prefix = %prefix, "Added managed rules to group");
                Ok(Reconciled::Applied)
            }
            None => {
                let mut new_group = RuleGroup::new(group);
                new_group.rules = desired;
                self.store.create_group(&new_group).await?;
                info!(group = %group, prefix = %prefix, "Created rule group");
                Ok(Reconciled::Applied)
            }
        }
    }

    /// Drop every rule carrying `prefix` from `group`, keeping the rest
    pub async fn remove_rules_by_prefix(&self, group: &str, prefix: &str) -> Result<Reconciled> {
        let Some(mut existing) = self.store.fetch(group).await? else {
            debug!(group = %group, "Rule group does not exist");
            return Ok(Reconciled::Noop);
        };

        let before = existing.rules.len();
        existing.rules.retain(|r| !r.has_prefix(prefix));
        if existing.rules.len() == before {
            return Ok(Reconciled::Noop);
        }

        self.store.replace_rules(&existing).await?;
        info!(
            group = %group,
            prefix = %prefix,
            removed = before - existing.rules.len(),
            "Removed managed rules from group"
        );
        Ok(Reconciled::Applied)
    }

    /// Delete a whole group if it exists
    pub async fn delete_group(&self, group: &str) -> Result<Reconciled> {
        if self.store.fetch(group).await?.is_none() {
            return Ok(Reconciled::Noop);
        }
        self.store.delete_group(group).await?;
        info!(group = %group, "Deleted rule group");
        Ok(Reconciled::Applied)
    }
}
