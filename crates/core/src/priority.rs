//! Domain priority tokens and their mapping onto queue ranks.
//!
//! A [`PriorityOrder`] lists the tokens of one subsystem's vocabulary from
//! most urgent to least urgent. A [`PriorityMap`] turns that order into a
//! token → [`Rank`] lookup. Tokens that are not part of the order, or are
//! absent altogether, rank [`Rank::LAST`] and run after everything else.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

use crate::rank::Rank;

/// Ordered list of priority tokens, most urgent first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PriorityOrder<P> {
    tokens: Vec<P>,
}

impl<P> PriorityOrder<P> {
    pub fn new(tokens: Vec<P>) -> Self {
        Self { tokens }
    }

    /// Tokens as supplied, duplicates included.
    pub fn tokens(&self) -> &[P] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl<P> From<Vec<P>> for PriorityOrder<P> {
    fn from(tokens: Vec<P>) -> Self {
        Self::new(tokens)
    }
}

impl<P: Clone> From<&[P]> for PriorityOrder<P> {
    fn from(tokens: &[P]) -> Self {
        Self::new(tokens.to_vec())
    }
}

impl<P, const N: usize> From<[P; N]> for PriorityOrder<P> {
    fn from(tokens: [P; N]) -> Self {
        Self::new(Vec::from(tokens))
    }
}

impl<P> FromIterator<P> for PriorityOrder<P> {
    fn from_iter<I: IntoIterator<Item = P>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Lookup from priority token to queue rank.
#[derive(Debug, Clone)]
pub struct PriorityMap<P> {
    ranks: HashMap<P, Rank>,
    ordered: Vec<P>,
}

impl<P> PriorityMap<P>
where
    P: Eq + Hash + Clone + Debug,
{
    /// Build the map. The token at position `i` gets [`Rank::from_ordinal`]`(i)`;
    /// a repeated token keeps the rank of its first occurrence.
    pub fn new(order: &PriorityOrder<P>) -> Self {
        let mut ranks = HashMap::with_capacity(order.len());
        let mut ordered = Vec::with_capacity(order.len());

        for (ordinal, token) in order.tokens().iter().enumerate() {
            if ranks.contains_key(token) {
                tracing::debug!(?token, ordinal, "ignoring duplicate priority token");
                continue;
            }
            ranks.insert(token.clone(), Rank::from_ordinal(ordinal));
            ordered.push(token.clone());
        }

        Self { ranks, ordered }
    }

    /// Rank of `token`, or [`Rank::LAST`] when the order does not know it.
    pub fn rank(&self, token: &P) -> Rank {
        self.ranks.get(token).copied().unwrap_or(Rank::LAST)
    }

    /// Rank of an optional token; `None` ranks [`Rank::LAST`].
    pub fn rank_of(&self, token: Option<&P>) -> Rank {
        token.map_or(Rank::LAST, |t| self.rank(t))
    }

    pub fn contains(&self, token: &P) -> bool {
        self.ranks.contains_key(token)
    }

    /// Distinct tokens in rank order.
    pub fn tokens(&self) -> &[P] {
        &self.ordered
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

impl<P> From<&PriorityOrder<P>> for PriorityMap<P>
where
    P: Eq + Hash + Clone + Debug,
{
    fn from(order: &PriorityOrder<P>) -> Self {
        Self::new(order)
    }
}
