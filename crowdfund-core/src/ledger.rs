//! Contribution ledger
//!
//! Ordered, deduplicated record of contributor → amount for one campaign.
//! Lookups are O(1) through an index into the entry vector; the vector keeps
//! first-contribution order so refunds and share allocation are deterministic.

use crate::{
    types::{Address, Amount},
    Error, Result,
};
use std::collections::HashMap;

/// Per-campaign contribution ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContributionLedger {
    /// Entries in first-contribution order
    entries: Vec<(Address, Amount)>,

    /// Contributor → position in `entries`
    index: HashMap<Address, usize>,

    /// Running sum of all amounts
    total: Amount,
}

impl ContributionLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to the contributor's entry, creating it if absent
    ///
    /// Returns the contributor's new total. Rejects zero amounts and
    /// overflow without modifying the ledger.
    pub fn add_or_accumulate(&mut self, contributor: &Address, amount: Amount) -> Result<Amount> {
        if amount == 0 {
            return Err(Error::ZeroContribution);
        }

        let total = self.total.checked_add(amount).ok_or(Error::AmountOverflow)?;

        let new_amount = match self.index.get(contributor) {
            Some(&pos) => {
                let entry = &mut self.entries[pos].1;
                *entry = entry.checked_add(amount).ok_or(Error::AmountOverflow)?;
                *entry
            }
            None => {
                self.index.insert(contributor.clone(), self.entries.len());
                self.entries.push((contributor.clone(), amount));
                amount
            }
        };

        self.total = total;
        Ok(new_amount)
    }

    /// Entries in first-contribution order
    pub fn entries(&self) -> &[(Address, Amount)] {
        &self.entries
    }

    /// Whether the contributor has an entry
    pub fn has(&self, contributor: &Address) -> bool {
        self.index.contains_key(contributor)
    }

    /// Amount recorded for the contributor
    pub fn amount_of(&self, contributor: &Address) -> Option<Amount> {
        self.index.get(contributor).map(|&pos| self.entries[pos].1)
    }

    /// Sum of all amounts
    pub fn total(&self) -> Amount {
        self.total
    }

    /// Number of distinct contributors
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the ledger has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Membership shares per contributor: `floor(amount / unit_price)`
    ///
    /// Remainders are not returned; they stay in the pooled value.
    pub fn share_counts(&self, unit_price: Amount) -> Result<Vec<u128>> {
        if unit_price == 0 {
            return Err(Error::InvalidParameters("unit price must be positive".to_string()));
        }
        Ok(self.entries.iter().map(|(_, amount)| amount / unit_price).collect())
    }

    /// Tear the ledger down, yielding its entries in order
    pub fn into_entries(self) -> Vec<(Address, Amount)> {
        self.entries
    }

    /// Recompute the total from the entries and compare with the running sum
    pub fn verify(&self) -> Result<()> {
        let mut sum: Amount = 0;
        for (contributor, amount) in &self.entries {
            if *amount == 0 {
                return Err(Error::InvariantViolation(format!(
                    "zero ledger entry for {}",
                    contributor
                )));
            }
            sum = sum.checked_add(*amount).ok_or(Error::AmountOverflow)?;
        }

        if sum != self.total || self.index.len() != self.entries.len() {
            return Err(Error::InvariantViolation(format!(
                "ledger total {} does not match entries {}",
                self.total, sum
            )));
        }

        Ok(())
    }
}
