//! Translate remote site-link badges and attach them to the local entity.

use std::collections::BTreeSet;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use crate::errors::ImportResult;
use crate::models::{Entity, LocalEntityId, RawSiteLink, RemoteEntityId};
use crate::store::MappingStore;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BadgeUpdateSummary {
    /// Badges newly attached across all site links.
    pub added: usize,
    /// Remote badge ids with no local counterpart, left off the entity.
    pub omitted: BTreeSet<RemoteEntityId>,
}

pub struct BadgeItemUpdater {
    mapping: Arc<dyn MappingStore>,
}

impl BadgeItemUpdater {
    pub fn new(mapping: Arc<dyn MappingStore>) -> Self {
        Self { mapping }
    }

    /// Resolve `raw_badges` to local ids. Unmapped badges come back in the
    /// second set.
    pub fn translate_badges(
        &self,
        raw_badges: &[RemoteEntityId],
    ) -> ImportResult<(BTreeSet<LocalEntityId>, BTreeSet<RemoteEntityId>)> {
        let mut resolved = BTreeSet::new();
        let mut omitted = BTreeSet::new();
        for badge in raw_badges {
            match self.mapping.resolve(badge)? {
                Some(local) => {
                    resolved.insert(local);
                }
                None => {
                    omitted.insert(*badge);
                }
            }
        }
        Ok((resolved, omitted))
    }

    /// Add the translated badges of each remote site link to the local site
    /// link for the same site. Existing badges are kept; sites the entity
    /// has no link for are ignored.
    pub fn update_badges(
        &self,
        entity: &mut Entity,
        raw_sitelinks: &IndexMap<String, RawSiteLink>,
    ) -> ImportResult<BadgeUpdateSummary> {
        let mut summary = BadgeUpdateSummary::default();
        for (site, raw_link) in raw_sitelinks {
            let Some(link) = entity.sitelinks.get_mut(site) else {
                continue;
            };
            let (resolved, omitted) = self.translate_badges(&raw_link.badges)?;
            for badge in resolved {
                if link.badges.insert(badge) {
                    summary.added += 1;
                }
            }
            for badge in &omitted {
                debug!(site = %site, badge = %badge, "badge has no local counterpart, omitted");
            }
            summary.omitted.extend(omitted);
        }
        Ok(summary)
    }
}
