//! Data Element (DE) types for v0 Presence advertisements.
//!
//! Each DE has a 4-bit type tag and (for most types) a 4-bit length that is
//! encoded directly in the header byte: `(length << 4) | type`. Two DE types
//! override the header length with a fixed additional size because their
//! true length cannot fit in 4 bits (encrypted identities, Eddystone ids).

use crate::bytes::BytesError;

/// The four-bit type tag of a Data Element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataElementType {
    Salt,
    PublicIdentity,
    PrivateIdentity,
    ContactsIdentity,
    TxPowerAction,
    Action,
    ModelId,
    EddystoneId,
    AccountKeyData,
    ConnectionStatus,
    Battery,
    /// A tag outside the known Data Element type table; preserved so the
    /// wire round trips instead of being rejected.
    Unknown(u8),
}

impl DataElementType {
    pub fn tag(self) -> u8 {
        match self {
            DataElementType::Salt => 0x0,
            DataElementType::PublicIdentity => 0x1,
            DataElementType::PrivateIdentity => 0x2,
            DataElementType::ContactsIdentity => 0x3,
            DataElementType::TxPowerAction => 0x5,
            DataElementType::Action => 0x6,
            DataElementType::ModelId => 0x7,
            DataElementType::EddystoneId => 0x8,
            DataElementType::AccountKeyData => 0x9,
            DataElementType::ConnectionStatus => 0xA,
            DataElementType::Battery => 0xB,
            DataElementType::Unknown(tag) => tag,
        }
    }

    pub fn from_tag(tag: u8) -> Self {
        match tag {
            0x0 => DataElementType::Salt,
            0x1 => DataElementType::PublicIdentity,
            0x2 => DataElementType::PrivateIdentity,
            0x3 => DataElementType::ContactsIdentity,
            0x5 => DataElementType::TxPowerAction,
            0x6 => DataElementType::Action,
            0x7 => DataElementType::ModelId,
            0x8 => DataElementType::EddystoneId,
            0x9 => DataElementType::AccountKeyData,
            0xA => DataElementType::ConnectionStatus,
            0xB => DataElementType::Battery,
            other => DataElementType::Unknown(other),
        }
    }

    pub fn is_encrypted_identity(self) -> bool {
        matches!(
            self,
            DataElementType::PrivateIdentity | DataElementType::ContactsIdentity
        )
    }

    pub fn is_identity(self) -> bool {
        self.is_encrypted_identity() || matches!(self, DataElementType::PublicIdentity)
    }
}

/// Extra bytes added on top of the header's 4-bit length for DE types whose
/// real payload cannot fit in 4 bits.
pub const ENCRYPTED_IDENTITY_EXTRA_LEN: usize = 16; // 2-byte salt + 14-byte metadata key
pub const EDDYSTONE_EXTRA_LEN: usize = 20;

/// Validates that `(type, header_length)` is an allowed combination in a v0
/// advertisement. Grounded on
/// `advertisement_decoder_impl.cc::IsDataElementAllowed`.
pub fn is_header_allowed(ty: DataElementType, header_length: usize) -> bool {
    match ty {
        DataElementType::Salt => header_length == 2,
        DataElementType::PublicIdentity => header_length == 0,
        DataElementType::PrivateIdentity | DataElementType::ContactsIdentity => {
            (2..=6).contains(&header_length)
        }
        DataElementType::TxPowerAction => (1..=3).contains(&header_length),
        DataElementType::Action => (1..=3).contains(&header_length),
        DataElementType::ModelId => header_length == 3,
        DataElementType::EddystoneId => header_length == 0,
        DataElementType::AccountKeyData => header_length <= 12,
        DataElementType::ConnectionStatus => header_length <= 3,
        DataElementType::Battery => header_length <= 3,
        DataElementType::Unknown(_) => false,
    }
}

/// The true on-wire length of a DE given its header length, accounting for
/// the two types that add fixed extra bytes beyond what the 4-bit header
/// field can express.
pub fn true_length(ty: DataElementType, header_length: usize) -> usize {
    match ty {
        DataElementType::PrivateIdentity | DataElementType::ContactsIdentity => {
            header_length + ENCRYPTED_IDENTITY_EXTRA_LEN
        }
        DataElementType::EddystoneId => header_length + EDDYSTONE_EXTRA_LEN,
        _ => header_length,
    }
}

/// A decoded (or to-be-encoded) Data Element: a type tag plus its value
/// bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataElement {
    pub ty: DataElementType,
    pub value: Vec<u8>,
}

impl DataElement {
    pub fn new(ty: DataElementType, value: impl Into<Vec<u8>>) -> Self {
        Self {
            ty,
            value: value.into(),
        }
    }

    /// Encodes this DE's header byte and value into `out`. Does not apply
    /// the extra-length adjustment rule to the *header* nibble; callers pass
    /// the header-nibble-sized length for encrypted-identity/Eddystone DEs
    /// (i.e. `value.len() - EXTRA`), matching the wire format.
    pub fn encode_with_header_length(&self, header_length: u8, out: &mut Vec<u8>) {
        out.push((header_length << 4) | self.ty.tag());
        out.extend_from_slice(&self.value);
    }
}

/// Parses one DE starting at the front of `input`, returning it and the
/// number of bytes consumed (header + true length).
pub fn parse_one(input: &[u8]) -> Result<(DataElement, usize), BytesError> {
    if input.is_empty() {
        return Err(BytesError::Eof);
    }
    let header = input[0];
    let header_length = usize::from(header >> 4);
    let ty = DataElementType::from_tag(header & 0x0F);
    if !is_header_allowed(ty, header_length) {
        return Err(BytesError::InvalidLength);
    }
    let len = true_length(ty, header_length);
    if input.len() < 1 + len {
        return Err(BytesError::Eof);
    }
    let value = input[1..1 + len].to_vec();
    Ok((DataElement { ty, value }, 1 + len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tx_power_de_round_trips() {
        let de = DataElement::new(DataElementType::TxPowerAction, vec![0x03]);
        let mut out = Vec::new();
        de.encode_with_header_length(1, &mut out);
        assert_eq!(out, vec![0x15, 0x03]);

        let (parsed, used) = parse_one(&out).unwrap();
        assert_eq!(used, out.len());
        assert_eq!(parsed, de);
    }

    #[test]
    fn encrypted_identity_header_length_excludes_extra_bytes() {
        // header length nibble = 2 (the actual 2-byte payload), true length
        // on wire = 2 + 16 = 18.
        let mut payload = vec![0u8; 18];
        payload[0] = 0xAA;
        let de = DataElement::new(DataElementType::PrivateIdentity, payload.clone());
        let mut out = Vec::new();
        de.encode_with_header_length(2, &mut out);
        assert_eq!(out.len(), 1 + 18);

        let (parsed, used) = parse_one(&out).unwrap();
        assert_eq!(used, out.len());
        assert_eq!(parsed.value, payload);
    }

    #[test]
    fn rejects_disallowed_header_length() {
        // Salt must be exactly length 2.
        let bytes = [0x10u8, 0xAA]; // length nibble = 1, not 2
        assert_eq!(parse_one(&bytes), Err(BytesError::InvalidLength));
    }
}
