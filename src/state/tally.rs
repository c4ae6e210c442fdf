//! Ranked vote counting.

use indexmap::IndexMap;

use crate::dao::models::VoteEntity;

/// Vote count of a single option.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    /// Option text as typed by the voters.
    pub option: String,
    /// Number of users whose current vote is this option.
    pub votes: usize,
}

/// Options ranked by descending vote count.
///
/// Votes are first ordered by `(cast_at, user)`, so the outcome does not depend on
/// the order a backend returns them in. Options tied on count keep the order in
/// which they were first voted for. Only options with at least one vote appear.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tally {
    standings: Vec<Standing>,
}

impl Tally {
    /// Count `votes`, one per user.
    pub fn from_votes(votes: &[VoteEntity]) -> Self {
        let mut ordered: Vec<&VoteEntity> = votes.iter().collect();
        ordered.sort_by(|a, b| a.cast_at.cmp(&b.cast_at).then_with(|| a.user.cmp(&b.user)));

        let mut counts: IndexMap<&str, usize> = IndexMap::new();
        for vote in ordered {
            *counts.entry(vote.option.as_str()).or_default() += 1;
        }

        let mut standings: Vec<Standing> = counts
            .into_iter()
            .map(|(option, votes)| Standing {
                option: option.to_owned(),
                votes,
            })
            .collect();
        // stable: ties keep first-seen order
        standings.sort_by(|a, b| b.votes.cmp(&a.votes));

        Self { standings }
    }

    /// Every counted option, best first.
    pub fn standings(&self) -> &[Standing] {
        &self.standings
    }

    /// The `limit` best options.
    pub fn top(&self, limit: usize) -> &[Standing] {
        &self.standings[..self.standings.len().min(limit)]
    }

    /// Total number of votes counted.
    pub fn total_votes(&self) -> usize {
        self.standings.iter().map(|standing| standing.votes).sum()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use uuid::Uuid;

    use super::*;

    fn votes(entries: &[(&str, &str, u64)]) -> Vec<VoteEntity> {
        let poll_id = Uuid::new_v4();
        entries
            .iter()
            .map(|(user, option, secs)| VoteEntity {
                poll_id,
                user: (*user).into(),
                option: (*option).into(),
                cast_at: SystemTime::UNIX_EPOCH + Duration::from_secs(*secs),
            })
            .collect()
    }

    fn summary(tally: &Tally) -> Vec<(&str, usize)> {
        tally
            .standings()
            .iter()
            .map(|s| (s.option.as_str(), s.votes))
            .collect()
    }

    #[test]
    fn ties_keep_first_seen_order() {
        let tally = Tally::from_votes(&votes(&[
            ("u1", "A", 1),
            ("u2", "B", 2),
            ("u3", "A", 3),
            ("u4", "C", 4),
            ("u5", "B", 5),
            ("u6", "A", 6),
            ("u7", "B", 7),
        ]));

        assert_eq!(summary(&tally), vec![("A", 3), ("B", 3), ("C", 1)]);
        assert_eq!(tally.top(5).len(), 3);
        assert_eq!(tally.total_votes(), 7);
    }

    #[test]
    fn input_order_does_not_matter() {
        let mut shuffled = votes(&[("u2", "B", 2), ("u1", "A", 1), ("u3", "B", 3), ("u4", "A", 4)]);
        let forward = Tally::from_votes(&shuffled);
        shuffled.reverse();
        let backward = Tally::from_votes(&shuffled);

        assert_eq!(forward, backward);
        assert_eq!(summary(&forward), vec![("A", 2), ("B", 2)]);
    }

    #[test]
    fn same_instant_falls_back_to_user_order() {
        let tally = Tally::from_votes(&votes(&[("zoe", "Z", 1), ("adam", "A", 1)]));
        assert_eq!(summary(&tally), vec![("A", 1), ("Z", 1)]);
    }

    #[test]
    fn top_truncates_without_losing_the_full_tally() {
        let entries: Vec<(String, String)> = (0..7)
            .map(|i| (format!("user{i}"), format!("option{i}")))
            .collect();
        let borrowed: Vec<(&str, &str, u64)> = entries
            .iter()
            .enumerate()
            .map(|(i, (user, option))| (user.as_str(), option.as_str(), i as u64))
            .collect();
        let tally = Tally::from_votes(&votes(&borrowed));

        assert_eq!(tally.standings().len(), 7);
        let top: Vec<_> = tally.top(5).iter().map(|s| s.option.as_str()).collect();
        assert_eq!(top, vec!["option0", "option1", "option2", "option3", "option4"]);
    }

    #[test]
    fn no_votes_gives_an_empty_tally() {
        let tally = Tally::from_votes(&[]);
        assert!(tally.standings().is_empty());
        assert!(tally.top(5).is_empty());
    }

    #[test]
    fn options_are_case_sensitive() {
        let tally = Tally::from_votes(&votes(&[("a", "Pizza", 1), ("b", "pizza", 2)]));
        assert_eq!(summary(&tally), vec![("Pizza", 1), ("pizza", 1)]);
    }
}
