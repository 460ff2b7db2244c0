//! Presence advertisement codec: Data Elements, the packed Action word, LDT
//! encryption, credential lookup, and scan-side filtering.

pub mod action;
pub mod codec;
pub mod credential;
pub mod data_element;
pub mod filter;
pub mod ldt;

pub use codec::{Advertisement, AdvertisementCodec, ActionDeStyle, CodecError, DecodedElement, PlainElement};
pub use credential::{CredentialStore, IdentityType, LocalCredential, SharedCredential};
pub use data_element::{DataElement, DataElementType};
pub use filter::{LegacyPresenceScanFilter, PresenceScanFilter, ScanRequest};
