//! Campaign registry
//!
//! Maps campaign ids to the open campaign and its ledger. Terminal
//! transitions remove the entry, which frees the id for a later campaign of
//! the same name.

use crate::{
    crypto::campaign_id,
    ledger::ContributionLedger,
    types::{Campaign, CampaignId, CrowdfundView},
    Error, Result,
};
use std::collections::BTreeMap;

/// Open campaigns keyed by id
#[derive(Debug, Default)]
pub struct CampaignRegistry {
    campaigns: BTreeMap<CampaignId, (Campaign, ContributionLedger)>,
}

impl CampaignRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new campaign with its opening ledger
    ///
    /// Fails with `DuplicateCampaign` if the id is taken; the existing
    /// record is left untouched.
    pub fn insert(&mut self, campaign: Campaign, ledger: ContributionLedger) -> Result<()> {
        if campaign.id != campaign_id(&campaign.params.name) {
            return Err(Error::InvariantViolation(format!(
                "campaign id {} does not hash from name {:?}",
                campaign.id, campaign.params.name
            )));
        }

        if self.campaigns.contains_key(&campaign.id) {
            return Err(Error::DuplicateCampaign(campaign.id));
        }

        self.campaigns.insert(campaign.id, (campaign, ledger));
        Ok(())
    }

    /// Whether an open campaign exists under this id
    pub fn contains(&self, id: &CampaignId) -> bool {
        self.campaigns.contains_key(id)
    }

    /// Campaign and ledger
    pub fn get(&self, id: &CampaignId) -> Result<(&Campaign, &ContributionLedger)> {
        self.campaigns
            .get(id)
            .map(|(campaign, ledger)| (campaign, ledger))
            .ok_or(Error::NoSuchCampaign(*id))
    }

    /// Mutable campaign and ledger
    pub(crate) fn get_mut(
        &mut self,
        id: &CampaignId,
    ) -> Result<(&mut Campaign, &mut ContributionLedger)> {
        self.campaigns
            .get_mut(id)
            .map(|(campaign, ledger)| (campaign, ledger))
            .ok_or(Error::NoSuchCampaign(*id))
    }

    /// Retire a campaign, returning its record and ledger
    pub(crate) fn remove(&mut self, id: &CampaignId) -> Result<(Campaign, ContributionLedger)> {
        self.campaigns.remove(id).ok_or(Error::NoSuchCampaign(*id))
    }

    /// `getCrowdfund`-style snapshot
    pub fn view(&self, id: &CampaignId) -> Result<CrowdfundView> {
        let (campaign, ledger) = self.get(id)?;
        let (contributors, contributions): (Vec<_>, Vec<_>) =
            ledger.entries().iter().cloned().unzip();

        Ok(CrowdfundView {
            id: campaign.id,
            details: campaign.params.clone(),
            status: campaign.status,
            contributors,
            contributions,
        })
    }

    /// Ids of all open campaigns, in id order
    pub fn ids(&self) -> Vec<CampaignId> {
        self.campaigns.keys().copied().collect()
    }

    /// Number of open campaigns
    pub fn len(&self) -> usize {
        self.campaigns.len()
    }

    /// Whether no campaigns are open
    pub fn is_empty(&self) -> bool {
        self.campaigns.is_empty()
    }

    /// Iterate over open campaigns and their ledgers
    pub fn iter(&self) -> impl Iterator<Item = (&Campaign, &ContributionLedger)> {
        self.campaigns.values().map(|(campaign, ledger)| (campaign, ledger))
    }
}
