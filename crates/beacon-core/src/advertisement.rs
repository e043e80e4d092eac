//! iBeacon advertisement decoding.
//!
//! Apple's iBeacon frame lives in the manufacturer-specific data for company
//! id `0x004C` (76). The value stored under that id, without the company id,
//! is laid out as:
//!
//! ```text
//! offset  0    1    2 ........... 17   18 19   20 21   22
//!         type len  proximity UUID     major   minor   tx power
//!         0x02 0x15 (16 bytes)         (BE)    (BE)
//! ```
//!
//! Backends report manufacturer data in one of two shapes, see [`Advertisement`].

use std::collections::HashMap;

use uuid::Uuid;

/// Bluetooth SIG company identifier for Apple, Inc.
pub const APPLE_COMPANY_ID: u16 = 76;

/// Property key under which a device property bag stores manufacturer data.
pub const MANUFACTURER_DATA_PROPERTY: &str = "ManufacturerData";

/// Shortest vendor payload that still carries UUID, major and minor.
const MIN_PAYLOAD_LEN: usize = 22;

/// A single value in a device property bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    /// Company id → manufacturer payload.
    ManufacturerData(HashMap<u16, Vec<u8>>),
    /// A textual property such as `Name` or `Alias`.
    Text(String),
    /// A numeric property such as `RSSI` or `TxPower`.
    Integer(i64),
}

/// Raw advertisement content as delivered by a scan backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advertisement {
    /// A structured property bag, manufacturer data nested under
    /// [`MANUFACTURER_DATA_PROPERTY`].
    Properties(HashMap<String, PropertyValue>),
    /// Manufacturer data keyed directly by company id.
    ManufacturerData(HashMap<u16, Vec<u8>>),
}

impl Default for Advertisement {
    fn default() -> Self {
        Self::ManufacturerData(HashMap::new())
    }
}

impl Advertisement {
    /// An advertisement carrying no manufacturer data at all.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Direct-shape advertisement with a single Apple payload.
    #[must_use]
    pub fn apple(payload: Vec<u8>) -> Self {
        Self::ManufacturerData(HashMap::from([(APPLE_COMPANY_ID, payload)]))
    }

    /// The manufacturer payload for `company_id`, whichever shape it arrived in.
    #[must_use]
    pub fn manufacturer_payload(&self, company_id: u16) -> Option<&[u8]> {
        let data = match self {
            Self::Properties(props) => match props.get(MANUFACTURER_DATA_PROPERTY)? {
                PropertyValue::ManufacturerData(data) => data,
                _ => return None,
            },
            Self::ManufacturerData(data) => data,
        };
        data.get(&company_id).map(Vec::as_slice)
    }
}

/// Identity fields carried by an iBeacon frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IBeacon {
    /// Proximity UUID, canonical hyphenated uppercase form.
    pub uuid: String,
    /// Major value.
    pub major: u16,
    /// Minor value.
    pub minor: u16,
}

/// Decode the iBeacon fields from an advertisement.
///
/// Returns `None` when the advertisement has no Apple manufacturer data or the
/// payload is too short. Many advertisements from the same device omit it, so
/// this is not an error.
#[must_use]
pub fn decode(advertisement: &Advertisement) -> Option<IBeacon> {
    advertisement
        .manufacturer_payload(APPLE_COMPANY_ID)
        .and_then(decode_payload)
}

/// Decode a vendor payload (company id already stripped).
#[must_use]
pub fn decode_payload(payload: &[u8]) -> Option<IBeacon> {
    if payload.len() < MIN_PAYLOAD_LEN {
        return None;
    }

    let uuid_bytes: [u8; 16] = payload[2..18].try_into().ok()?;
    let uuid = format!("{:X}", Uuid::from_bytes(uuid_bytes).hyphenated());
    let major = u16::from_be_bytes([payload[18], payload[19]]);
    let minor = u16::from_be_bytes([payload[20], payload[21]]);

    Some(IBeacon { uuid, major, minor })
}

/// Decode a raw manufacturer-specific AD structure that still starts with the
/// little-endian company id, as captured off the air (`4c 00 02 15 ...`).
///
/// Returns `None` for other vendors.
#[must_use]
pub fn decode_raw(data: &[u8]) -> Option<IBeacon> {
    match data {
        [lo, hi, payload @ ..] if u16::from_le_bytes([*lo, *hi]) == APPLE_COMPANY_ID => {
            decode_payload(payload)
        }
        _ => None,
    }
}
