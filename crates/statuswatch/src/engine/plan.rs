//! Pure diffing of a fetched feed against the watermark.

use std::collections::BTreeSet;

use notify::IncidentNotice;

use crate::feed::Incident;
use crate::store::Watermark;

/// Number of incidents the status page exposes in one listing. Anything
/// older than the last retained incident can no longer be observed.
pub const FEED_WINDOW_SIZE: usize = 50;

/// Who an update still has to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    /// Not seen before: every registered destination.
    Everyone,
    /// Already seen: only destinations waiting for a backfill.
    PendingOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub notice: IncidentNotice,
    pub audience: Audience,
}

/// What a cycle has to do, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CyclePlan {
    pub deliveries: Vec<Delivery>,
    /// Watermark incident is no longer the newest incident.
    pub stale: bool,
    /// Watermark incident has left the feed window entirely.
    pub scrolled_off: bool,
    /// Index of the first incident this cycle looks at.
    pub resume_from: usize,
    /// Watermark to commit once every delivery has been attempted.
    pub target: Watermark,
}

/// Cap the listing at the window size and order it oldest first, each
/// incident's updates oldest first too.
pub fn normalize_feed(mut incidents: Vec<Incident>, window_size: usize) -> Vec<Incident> {
    incidents.truncate(window_size);
    incidents.reverse();
    for incident in &mut incidents {
        incident.incident_updates.reverse();
    }
    incidents
}

/// Whether nothing is left to do for the newest incident.
pub fn is_up_to_date(incidents: &[Incident], watermark: &Watermark) -> bool {
    incidents.last().is_some_and(|newest| {
        newest.id == watermark.incident_id
            && newest
                .update_ids()
                .all(|id| watermark.seen_update_ids.contains(id))
    })
}

/// Diff a normalized feed against the watermark.
///
/// Processing resumes at the watermark incident. When that incident has
/// scrolled out of the window, it resumes at the window boundary (the oldest
/// retained incident) and every update from there on counts as unseen.
///
/// Seen ids are consulted only to skip updates already handled; when the
/// watermark is stale they are dropped from the committed watermark, which
/// then only covers the newest incident.
pub fn plan_cycle(incidents: &[Incident], watermark: &Watermark, has_pending: bool) -> CyclePlan {
    let Some(newest) = incidents.last() else {
        return CyclePlan {
            deliveries: Vec::new(),
            stale: false,
            scrolled_off: false,
            resume_from: 0,
            target: watermark.clone(),
        };
    };
    let newest_idx = incidents.len() - 1;

    let resume = incidents
        .iter()
        .position(|incident| incident.id == watermark.incident_id);
    let scrolled_off = resume.is_none();
    let stale = newest.id != watermark.incident_id;
    let start = resume.unwrap_or(0);

    let mut deliveries = Vec::new();
    for (idx, incident) in incidents.iter().enumerate().skip(start) {
        let at_boundary = scrolled_off && idx == 0;
        let is_newest = idx == newest_idx;

        for update in &incident.incident_updates {
            let seen = !at_boundary && watermark.seen_update_ids.contains(&update.id);
            let audience = if !seen {
                Audience::Everyone
            } else if has_pending && is_newest {
                Audience::PendingOnly
            } else {
                continue;
            };
            deliveries.push(Delivery {
                notice: incident.notice_for(update),
                audience,
            });
        }
    }

    let mut seen_update_ids: BTreeSet<String> = if stale {
        BTreeSet::new()
    } else {
        watermark.seen_update_ids.clone()
    };
    seen_update_ids.extend(newest.update_ids().map(str::to_string));

    CyclePlan {
        deliveries,
        stale,
        scrolled_off,
        resume_from: start,
        target: Watermark::new(newest.id.clone(), seen_update_ids),
    }
}

/// Watermark to commit after dispatch, given the updates that some
/// destination still misses.
///
/// Incomplete updates never count as seen. If one of them belongs to an
/// incident older than the newest, the watermark stays on that incident so
/// the next cycle resumes there and retries it.
pub fn settle_watermark(
    incidents: &[Incident],
    plan: &CyclePlan,
    incomplete: &BTreeSet<String>,
) -> Watermark {
    let older = incidents.len().saturating_sub(1);
    let held = incidents[..older]
        .iter()
        .enumerate()
        .skip(plan.resume_from)
        .find(|(_, incident)| incident.update_ids().any(|id| incomplete.contains(id)));

    match held {
        Some((idx, incident)) => {
            let seen_update_ids = incidents[idx..]
                .iter()
                .flat_map(Incident::update_ids)
                .filter(|id| !incomplete.contains(*id))
                .map(str::to_string)
                .collect();
            Watermark::new(incident.id.clone(), seen_update_ids)
        }
        None => {
            let mut target = plan.target.clone();
            target.seen_update_ids.retain(|id| !incomplete.contains(id));
            target
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::incident;

    fn watermark(id: &str, seen: &[&str]) -> Watermark {
        Watermark::new(id, seen.iter().map(ToString::to_string).collect())
    }

    fn ids(plan: &CyclePlan) -> Vec<(&str, Audience)> {
        plan.deliveries
            .iter()
            .map(|d| (d.notice.update_id.as_str(), d.audience))
            .collect()
    }

    #[test]
    fn test_normalize_reverses_and_truncates() {
        let feed = vec![
            incident("c", &["c2", "c1"]),
            incident("b", &["b1"]),
            incident("a", &[]),
        ];
        let normalized = normalize_feed(feed, 2);
        let order: Vec<_> = normalized.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(order, ["b", "c"]);
        assert_eq!(normalized[1].update_ids().collect::<Vec<_>>(), ["c1", "c2"]);
    }

    #[test]
    fn test_up_to_date() {
        let feed = vec![incident("a", &["a1"]), incident("b", &["b1", "b2"])];
        assert!(is_up_to_date(&feed, &watermark("b", &["b1", "b2"])));
        assert!(!is_up_to_date(&feed, &watermark("b", &["b1"])));
        assert!(!is_up_to_date(&feed, &watermark("a", &["a1"])));
        assert!(!is_up_to_date(&[], &watermark("a", &[])));
    }

    #[test]
    fn test_new_update_on_current_incident() {
        let feed = vec![incident("a", &["a1"]), incident("b", &["b1", "b2"])];
        let plan = plan_cycle(&feed, &watermark("b", &["b1"]), false);

        assert!(!plan.stale);
        assert_eq!(ids(&plan), [("b2", Audience::Everyone)]);
        assert_eq!(plan.target, watermark("b", &["b1", "b2"]));
    }

    #[test]
    fn test_pending_replays_seen_updates_of_newest_only() {
        let feed = vec![incident("a", &["a1"]), incident("b", &["b1", "b2"])];
        let plan = plan_cycle(&feed, &watermark("b", &["b1"]), true);

        assert_eq!(
            ids(&plan),
            [("b1", Audience::PendingOnly), ("b2", Audience::Everyone)]
        );
    }

    #[test]
    fn test_new_incident_makes_watermark_stale() {
        let feed = vec![
            incident("a", &["a1", "a2"]),
            incident("b", &["b1"]),
            incident("c", &["c1"]),
        ];
        let plan = plan_cycle(&feed, &watermark("b", &["b1"]), true);

        assert!(plan.stale);
        assert!(!plan.scrolled_off);
        assert_eq!(ids(&plan), [("c1", Audience::Everyone)]);
        assert_eq!(plan.target, watermark("c", &["c1"]));
    }

    #[test]
    fn test_stale_watermark_delivers_late_updates_of_old_incident() {
        let feed = vec![incident("b", &["b1", "b2"]), incident("c", &["c1"])];
        let plan = plan_cycle(&feed, &watermark("b", &["b1"]), false);

        assert_eq!(
            ids(&plan),
            [("b2", Audience::Everyone), ("c1", Audience::Everyone)]
        );
        assert_eq!(plan.target, watermark("c", &["c1"]));
    }

    #[test]
    fn test_scrolled_off_resumes_at_window_boundary() {
        let feed = vec![incident("y", &["y1"]), incident("z", &["z1", "z2"])];
        let plan = plan_cycle(&feed, &watermark("gone", &["y1"]), false);

        assert!(plan.scrolled_off);
        assert!(plan.stale);
        assert_eq!(
            ids(&plan),
            [
                ("y1", Audience::Everyone),
                ("z1", Audience::Everyone),
                ("z2", Audience::Everyone),
            ]
        );
        assert_eq!(plan.target, watermark("z", &["z1", "z2"]));
    }

    #[test]
    fn test_settle_keeps_incomplete_updates_unseen() {
        let feed = vec![incident("a", &["a1"]), incident("b", &["b1", "b2"])];
        let plan = plan_cycle(&feed, &watermark("b", &["b1"]), false);

        let settled = settle_watermark(&feed, &plan, &BTreeSet::from(["b2".to_string()]));

        assert_eq!(settled, watermark("b", &["b1"]));
    }

    #[test]
    fn test_settle_holds_on_older_incident_with_failures() {
        let feed = vec![
            incident("a", &["a1"]),
            incident("b", &["b1", "b2"]),
            incident("c", &["c1"]),
        ];
        let plan = plan_cycle(&feed, &watermark("b", &["b1"]), false);
        assert_eq!(plan.resume_from, 1);

        let settled = settle_watermark(&feed, &plan, &BTreeSet::from(["b2".to_string()]));
        assert_eq!(settled, watermark("b", &["b1", "c1"]));

        let settled = settle_watermark(&feed, &plan, &BTreeSet::new());
        assert_eq!(settled, watermark("c", &["c1"]));
    }

    #[test]
    fn test_incident_without_updates() {
        let feed = vec![incident("a", &[])];
        let plan = plan_cycle(&feed, &watermark("a", &[]), true);
        assert!(plan.deliveries.is_empty());
        assert_eq!(plan.target, watermark("a", &[]));
    }
}
