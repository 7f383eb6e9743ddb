//! Choosing where new gateways go.
//!
//! Candidates are kept in the order the provider listed them; the first
//! eligible ones win.

/// A zone (or subnet, or node) that could host a gateway
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneCandidate<T = String> {
    /// What would be selected (zone name, subnet, node...)
    pub id: T,
    /// The instance type can be launched here
    pub has_capacity: bool,
    /// A gateway already runs here
    pub hosts_gateway: bool,
}

impl<T> ZoneCandidate<T> {
    /// A candidate with capacity and no gateway
    pub fn available(id: T) -> Self {
        Self {
            id,
            has_capacity: true,
            hosts_gateway: false,
        }
    }

    /// True when a new gateway may be placed here
    pub fn is_eligible(&self) -> bool {
        self.has_capacity && !self.hosts_gateway
    }
}

/// Eligible candidates, in listing order
pub fn eligible_placements<T, I>(candidates: I) -> Vec<T>
where
    I: IntoIterator<Item = ZoneCandidate<T>>,
{
    candidates
        .into_iter()
        .filter(ZoneCandidate::is_eligible)
        .map(|c| c.id)
        .collect()
}

/// The placements chosen for one scale-up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementPlan<T> {
    /// Placements to create, at most the number needed
    pub selected: Vec<T>,
    /// Gateways that could not be placed
    pub shortfall: usize,
}

impl<T> PlacementPlan<T> {
    /// Take the first `needed` eligible placements
    pub fn new(mut eligible: Vec<T>, needed: usize) -> Self {
        let shortfall = needed.saturating_sub(eligible.len());
        eligible.truncate(needed);
        Self {
            selected: eligible,
            shortfall,
        }
    }

    /// True when every needed gateway has a placement
    pub fn is_sufficient(&self) -> bool {
        self.shortfall == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn candidates() -> Vec<ZoneCandidate> {
        vec![
            ZoneCandidate::available("zone-a".to_string()),
            ZoneCandidate {
                id: "zone-b".to_string(),
                has_capacity: false,
                hosts_gateway: false,
            },
            ZoneCandidate {
                id: "zone-c".to_string(),
                has_capacity: true,
                hosts_gateway: true,
            },
            ZoneCandidate::available("zone-d".to_string()),
        ]
    }

    #[test]
    fn test_only_eligible_candidates_survive_in_order() {
        assert_eq!(eligible_placements(candidates()), vec!["zone-a", "zone-d"]);
    }

    #[rstest]
    #[case::fewer_needed(1, 1, 0)]
    #[case::exact(2, 2, 0)]
    #[case::short_by_one(3, 2, 1)]
    #[case::none_needed(0, 0, 0)]
    fn test_plan_selects_and_reports_shortfall(
        #[case] needed: usize,
        #[case] selected: usize,
        #[case] shortfall: usize,
    ) {
        let eligible = eligible_placements(candidates());
        let plan = PlacementPlan::new(eligible.clone(), needed);

        assert_eq!(plan.selected.len(), selected);
        assert_eq!(plan.shortfall, shortfall);
        assert_eq!(plan.is_sufficient(), shortfall == 0);
        assert!(plan.selected.iter().all(|z| eligible.contains(z)));
    }

    #[test]
    fn test_no_candidates_means_full_shortfall() {
        let plan = PlacementPlan::new(eligible_placements(Vec::<ZoneCandidate>::new()), 2);
        assert!(plan.selected.is_empty());
        assert_eq!(plan.shortfall, 2);
    }
}
