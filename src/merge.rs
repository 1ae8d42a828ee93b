//! Merge completion and cancellation policy.
//!
//! Each Split execution opens a [`SplitActivation`]: the bookkeeping record
//! that collects branch outcomes and decides, per the Merge's
//! [`MergeBehavior`](crate::flow::MergeBehavior), when the merge may fire.
//! Activations live in an append-only arena on the instance so their ids
//! stay stable across snapshots, and a fired/closed flag pair enforces the
//! "a merge never fires twice per activation" invariant.
//!
//! The policy itself is pure bookkeeping; the scheduler performs the actual
//! cancellation side effects (removing queued work, dropping bookmarks,
//! running cancellation paths) and feeds the acknowledgments back in as
//! [`BranchOutcome::Canceled`] arrivals.

use serde::{Deserialize, Serialize};

use crate::types::{Membership, NodeId, ScopeId};

/// Terminal outcome reported by one branch of a Split activation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchOutcome {
    /// The branch reached the merge.
    Completed,
    /// The branch acknowledged cancellation.
    Canceled,
}

/// What the merge policy tells the scheduler after a branch arrival.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergeDecision {
    /// All branches have reported; schedule the merge's successor now.
    Fire,
    /// Keep waiting for the remaining branches.
    Wait,
}

/// Bookkeeping for one activation of a Split.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SplitActivation {
    /// The Split node that opened this activation.
    pub split: NodeId,
    /// The Merge owned by that Split.
    pub merge: NodeId,
    /// Scope the Split executed in; the merge successor continues here.
    pub origin_scope: ScopeId,
    /// Membership of the work item that executed the Split, i.e. the outer
    /// branch this whole activation runs under (None at top level).
    pub parent: Option<Membership>,
    /// Per-branch outcome slots, indexed by declaration order.
    pub outcomes: Vec<Option<BranchOutcome>>,
    /// Set the moment the merge fires; never cleared.
    pub fired: bool,
    /// Set when the activation is torn down by an enclosing cancellation;
    /// a closed activation never fires.
    pub closed: bool,
}

impl SplitActivation {
    #[must_use]
    pub fn new(
        split: NodeId,
        merge: NodeId,
        branch_count: usize,
        origin_scope: ScopeId,
        parent: Option<Membership>,
    ) -> Self {
        Self {
            split,
            merge,
            origin_scope,
            parent,
            outcomes: vec![None; branch_count],
            fired: false,
            closed: false,
        }
    }

    #[must_use]
    pub fn branch_count(&self) -> usize {
        self.outcomes.len()
    }

    /// Whether every branch has reported an outcome.
    #[must_use]
    pub fn all_reported(&self) -> bool {
        self.outcomes.iter().all(Option::is_some)
    }

    /// Branch indices that have not reported yet, in declaration order.
    #[must_use]
    pub fn unreported(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.is_none().then_some(i))
            .collect()
    }

    /// Whether this is the first `Completed` arrival, which under
    /// [`MergeBehavior::First`](crate::flow::MergeBehavior::First) triggers
    /// sibling cancellation.
    #[must_use]
    pub fn is_first_completion(&self) -> bool {
        !self
            .outcomes
            .iter()
            .any(|o| matches!(o, Some(BranchOutcome::Completed)))
    }

    /// Records `outcome` for `branch` and decides whether the merge fires.
    ///
    /// Late or duplicate arrivals against a fired or closed activation are
    /// ignored (`Wait`); a fired activation never fires again. When `Fire`
    /// is returned the fired flag is set atomically with the decision.
    pub fn on_branch_arrive(&mut self, branch: usize, outcome: BranchOutcome) -> MergeDecision {
        if self.fired || self.closed {
            tracing::warn!(
                split = %self.split,
                merge = %self.merge,
                branch,
                "branch arrival on a settled activation; ignoring"
            );
            return MergeDecision::Wait;
        }
        if self.outcomes[branch].is_some() {
            tracing::warn!(
                split = %self.split,
                branch,
                "branch reported twice; keeping first outcome"
            );
            return MergeDecision::Wait;
        }
        self.outcomes[branch] = Some(outcome);

        // Both merge behaviors reduce to "fire once every branch has
        // reported": WaitAll through natural completion, First because the
        // scheduler converts unreported siblings into Canceled
        // acknowledgments around the winning arrival.
        if self.all_reported() {
            self.fired = true;
            MergeDecision::Fire
        } else {
            MergeDecision::Wait
        }
    }
}

/// Whether `membership` sits at or under `target` in the activation tree.
///
/// Walks the parent chain through `activations`; used to find every work
/// item, bookmark, and nested activation that belongs to a branch being
/// canceled.
#[must_use]
pub fn membership_is_under(
    activations: &[SplitActivation],
    membership: Option<Membership>,
    target: Membership,
) -> bool {
    let mut cursor = membership;
    while let Some(m) = cursor {
        if m == target {
            return true;
        }
        cursor = activations
            .get(m.activation.index())
            .and_then(|a| a.parent);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ActivationId;

    fn membership(activation: usize, branch: usize) -> Membership {
        Membership {
            activation: ActivationId::new(activation),
            branch,
        }
    }

    #[test]
    fn wait_all_fires_only_when_every_branch_reports() {
        let mut act =
            SplitActivation::new(NodeId::new(0), NodeId::new(3), 3, ScopeId::ROOT, None);
        assert_eq!(
            act.on_branch_arrive(1, BranchOutcome::Completed),
            MergeDecision::Wait
        );
        assert_eq!(
            act.on_branch_arrive(0, BranchOutcome::Completed),
            MergeDecision::Wait
        );
        assert_eq!(
            act.on_branch_arrive(2, BranchOutcome::Completed),
            MergeDecision::Fire
        );
        assert!(act.fired);
    }

    #[test]
    fn fired_activation_never_fires_again() {
        let mut act =
            SplitActivation::new(NodeId::new(0), NodeId::new(2), 1, ScopeId::ROOT, None);
        assert_eq!(
            act.on_branch_arrive(0, BranchOutcome::Completed),
            MergeDecision::Fire
        );
        assert_eq!(
            act.on_branch_arrive(0, BranchOutcome::Completed),
            MergeDecision::Wait
        );
    }

    #[test]
    fn canceled_acknowledgments_complete_a_first_merge() {
        let mut act =
            SplitActivation::new(NodeId::new(0), NodeId::new(4), 2, ScopeId::ROOT, None);
        assert!(act.is_first_completion());
        // Arrival order does not matter; the set completing does.
        assert_eq!(
            act.on_branch_arrive(1, BranchOutcome::Canceled),
            MergeDecision::Wait
        );
        assert_eq!(
            act.on_branch_arrive(0, BranchOutcome::Completed),
            MergeDecision::Fire
        );
    }

    #[test]
    fn membership_chain_resolution() {
        let outer =
            SplitActivation::new(NodeId::new(0), NodeId::new(5), 2, ScopeId::ROOT, None);
        let inner = SplitActivation::new(
            NodeId::new(2),
            NodeId::new(4),
            2,
            ScopeId::ROOT,
            Some(membership(0, 1)),
        );
        let activations = vec![outer, inner];

        // Item in the inner activation is under outer branch 1...
        assert!(membership_is_under(
            &activations,
            Some(membership(1, 0)),
            membership(0, 1)
        ));
        // ...but not under outer branch 0.
        assert!(!membership_is_under(
            &activations,
            Some(membership(1, 0)),
            membership(0, 0)
        ));
        // Top-level items are under nothing.
        assert!(!membership_is_under(&activations, None, membership(0, 0)));
    }
}
