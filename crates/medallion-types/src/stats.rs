//! Running amount statistics and the singleton aggregate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::Amount;
use crate::record::RawId;

/// Count / sum / min / max over a set of amounts.
///
/// `min` and `max` are `None` until the first amount is observed; an empty
/// side is the identity of [`AmountStats::merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmountStats {
    pub count: u64,
    pub sum: Amount,
    pub min: Option<Amount>,
    pub max: Option<Amount>,
}

impl AmountStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Fold one amount in.
    pub fn observe(&mut self, amount: &Amount) {
        self.count += 1;
        self.sum = &self.sum + amount;
        self.min = Some(match self.min.take() {
            Some(current) if current <= *amount => current,
            _ => amount.clone(),
        });
        self.max = Some(match self.max.take() {
            Some(current) if current >= *amount => current,
            _ => amount.clone(),
        });
    }

    /// Combine two disjoint summaries.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            count: self.count + other.count,
            sum: &self.sum + &other.sum,
            min: pick(self.min.as_ref(), other.min.as_ref(), std::cmp::min),
            max: pick(self.max.as_ref(), other.max.as_ref(), std::cmp::max),
        }
    }

    /// Mean rounded half-up to two places; `None` when empty.
    #[must_use]
    pub fn average(&self) -> Option<Amount> {
        Amount::mean(&self.sum, self.count)
    }
}

fn pick(
    a: Option<&Amount>,
    b: Option<&Amount>,
    choose: fn(Amount, Amount) -> Amount,
) -> Option<Amount> {
    match (a, b) {
        (Some(a), Some(b)) => Some(choose(a.clone(), b.clone())),
        (Some(v), None) | (None, Some(v)) => Some(v.clone()),
        (None, None) => None,
    }
}

impl<'a> Extend<&'a Amount> for AmountStats {
    fn extend<I: IntoIterator<Item = &'a Amount>>(&mut self, iter: I) {
        for amount in iter {
            self.observe(amount);
        }
    }
}

impl<'a> FromIterator<&'a Amount> for AmountStats {
    fn from_iter<I: IntoIterator<Item = &'a Amount>>(iter: I) -> Self {
        let mut stats = Self::new();
        stats.extend(iter);
        stats
    }
}

/// The GOLD-layer singleton: statistics over every typed record whose id is
/// at or below `watermark`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub stats: AmountStats,
    pub watermark: RawId,
    pub updated_at: DateTime<Utc>,
}

impl Aggregate {
    /// Zero-initialized aggregate.
    #[must_use]
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            stats: AmountStats::new(),
            watermark: RawId::ZERO,
            updated_at: now,
        }
    }

    /// Next aggregate after folding in a chunk whose highest id is `last_id`.
    ///
    /// The watermark never moves backwards, even if `last_id` is stale.
    #[must_use]
    pub fn fold(&self, chunk: &AmountStats, last_id: RawId, now: DateTime<Utc>) -> Self {
        Self {
            stats: self.stats.merge(chunk),
            watermark: self.watermark.max(last_id),
            updated_at: now,
        }
    }
}
