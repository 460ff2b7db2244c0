//! Scan-side filtering of decoded advertisements.

use crate::advertisement::codec::{Advertisement, DecodedElement};
use crate::advertisement::credential::IdentityType;

/// An "all of" filter over extended properties. An advertisement matches
/// iff every listed property is present among its decoded elements.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PresenceScanFilter {
    pub extended_properties: Vec<DecodedElement>,
}

impl PresenceScanFilter {
    pub fn matches(&self, advertisement: &Advertisement) -> bool {
        self.extended_properties
            .iter()
            .all(|prop| advertisement.data_elements.contains(prop))
    }
}

/// An "any of" filter over legacy action flags. An empty `actions` list is
/// a wildcard (always matches).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyPresenceScanFilter {
    pub actions: Vec<DecodedElement>,
}

impl LegacyPresenceScanFilter {
    pub fn matches(&self, advertisement: &Advertisement) -> bool {
        if self.actions.is_empty() {
            return true;
        }
        self.actions
            .iter()
            .any(|action| advertisement.data_elements.contains(action))
    }
}

/// One scan's combined filter set: an identity-type allow-list plus zero or
/// more filters.
#[derive(Debug, Clone, Default)]
pub struct ScanRequest {
    pub identity_allow_list: Vec<IdentityType>,
    pub presence_filters: Vec<PresenceScanFilter>,
    pub legacy_filters: Vec<LegacyPresenceScanFilter>,
}

impl ScanRequest {
    pub fn matches(&self, advertisement: &Advertisement) -> bool {
        let identity_ok = self.identity_allow_list.is_empty()
            || advertisement
                .identity_type
                .map(|ty| self.identity_allow_list.contains(&ty))
                .unwrap_or(false);
        if !identity_ok {
            return false;
        }

        if self.presence_filters.is_empty() && self.legacy_filters.is_empty() {
            return true;
        }

        self.presence_filters.iter().any(|f| f.matches(advertisement))
            || self.legacy_filters.iter().any(|f| f.matches(advertisement))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advertisement::action::{Action, ActionFlag};
    use crate::advertisement::codec::AdvertisementCodec;
    use crate::advertisement::codec::{ActionDeStyle, PlainElement};
    use crate::advertisement::credential::CredentialStore;

    fn advert_with(elements: &[PlainElement]) -> Advertisement {
        let bytes = AdvertisementCodec::encode_public(elements, ActionDeStyle::Separate).unwrap();
        AdvertisementCodec::decode(&bytes, &CredentialStore::new()).unwrap()
    }

    #[test]
    fn presence_filter_requires_all_properties() {
        let advertisement = advert_with(&[PlainElement::TxPower(3)]);
        let filter = PresenceScanFilter {
            extended_properties: vec![DecodedElement::TxPower(3), DecodedElement::TxPower(9)],
        };
        assert!(!filter.matches(&advertisement));

        let filter = PresenceScanFilter {
            extended_properties: vec![DecodedElement::TxPower(3)],
        };
        assert!(filter.matches(&advertisement));
    }

    #[test]
    fn adding_a_matching_de_can_only_turn_non_match_into_match() {
        // Monotonicity: PresenceScanFilter's all-of match can only flip
        // false->true as more DEs are added, never true->false.
        let before = advert_with(&[]);
        let after = advert_with(&[PlainElement::TxPower(3)]);
        let filter = PresenceScanFilter {
            extended_properties: vec![DecodedElement::TxPower(3)],
        };
        assert!(!filter.matches(&before));
        assert!(filter.matches(&after));
    }

    #[test]
    fn legacy_filter_empty_actions_is_wildcard() {
        let advertisement = advert_with(&[PlainElement::TxPower(1)]);
        let filter = LegacyPresenceScanFilter::default();
        assert!(filter.matches(&advertisement));
    }

    #[test]
    fn legacy_filter_matches_any_listed_action() {
        let advertisement = advert_with(&[PlainElement::Action(
            Action::default().with_flag(ActionFlag::FastPair),
        )]);
        let filter = LegacyPresenceScanFilter {
            actions: vec![DecodedElement::Action(
                Action::default().with_flag(ActionFlag::FastPair),
            )],
        };
        assert!(filter.matches(&advertisement));

        let filter = LegacyPresenceScanFilter {
            actions: vec![DecodedElement::Action(
                Action::default().with_flag(ActionFlag::PhoneHub),
            )],
        };
        assert!(!filter.matches(&advertisement));
    }
}
