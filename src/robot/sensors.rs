// Sensor packet registry for the Roomba Open Interface
//
// Every sensor packet the robot can report has a fixed id, a fixed wire format
// and a name. The table is immutable once built; the process-wide instance is
// created lazily on first use and shared read-only.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use super::error::{OiError, Result};

/// How a sensor value is laid out on the wire (multi-byte values are big-endian)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    U8,
    I8,
    U16,
    I16,
    /// Opaque fixed-length byte block
    Block(usize),
}

impl WireFormat {
    /// Number of value bytes on the wire
    pub const fn width(self) -> usize {
        match self {
            WireFormat::U8 | WireFormat::I8 => 1,
            WireFormat::U16 | WireFormat::I16 => 2,
            WireFormat::Block(len) => len,
        }
    }

    /// Decode exactly `width()` bytes
    pub fn decode(self, bytes: &[u8]) -> Result<SensorValue> {
        if bytes.len() != self.width() {
            return Err(OiError::MalformedFrame {
                reason: format!("expected {} value bytes, got {}", self.width(), bytes.len()),
            });
        }

        Ok(match self {
            WireFormat::U8 => SensorValue::U8(bytes[0]),
            WireFormat::I8 => SensorValue::I8(bytes[0] as i8),
            WireFormat::U16 => SensorValue::U16(u16::from_be_bytes([bytes[0], bytes[1]])),
            WireFormat::I16 => SensorValue::I16(i16::from_be_bytes([bytes[0], bytes[1]])),
            WireFormat::Block(_) => SensorValue::Block(bytes.to_vec()),
        })
    }

    /// Append the wire bytes of `value`, which must match this format
    pub fn encode(self, value: &SensorValue, out: &mut Vec<u8>) -> Result<()> {
        match (self, value) {
            (WireFormat::U8, SensorValue::U8(v)) => out.push(*v),
            (WireFormat::I8, SensorValue::I8(v)) => out.push(*v as u8),
            (WireFormat::U16, SensorValue::U16(v)) => out.extend_from_slice(&v.to_be_bytes()),
            (WireFormat::I16, SensorValue::I16(v)) => out.extend_from_slice(&v.to_be_bytes()),
            (WireFormat::Block(len), SensorValue::Block(bytes)) if bytes.len() == len => {
                out.extend_from_slice(bytes)
            }
            (format, value) => {
                return Err(OiError::MalformedFrame {
                    reason: format!("value {:?} does not fit wire format {:?}", value, format),
                });
            }
        }
        Ok(())
    }
}

/// A decoded sensor reading
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(untagged)]
pub enum SensorValue {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    Block(Vec<u8>),
}

impl SensorValue {
    /// Numeric view of scalar readings
    pub fn as_i32(&self) -> Option<i32> {
        match *self {
            SensorValue::U8(v) => Some(v as i32),
            SensorValue::I8(v) => Some(v as i32),
            SensorValue::U16(v) => Some(v as i32),
            SensorValue::I16(v) => Some(v as i32),
            SensorValue::Block(_) => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match *self {
            SensorValue::U8(v) => Some(v as u16),
            SensorValue::U16(v) => Some(v),
            _ => None,
        }
    }
}

/// One sensor packet: wire id, format and name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorDescriptor {
    pub id: u8,
    pub format: WireFormat,
    pub name: &'static str,
}

impl SensorDescriptor {
    pub const fn new(id: u8, format: WireFormat, name: &'static str) -> Self {
        Self { id, format, name }
    }
}

/// A named, ordered group of sensors queried together. Has no wire id of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BulkDescriptor {
    pub name: &'static str,
    pub members: &'static [u8],
}

/// Registry entry, resolved when the table is built
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SensorEntry {
    Scalar(SensorDescriptor),
    Bulk(BulkDescriptor),
}

impl SensorEntry {
    pub fn name(&self) -> &'static str {
        match self {
            SensorEntry::Scalar(d) => d.name,
            SensorEntry::Bulk(b) => b.name,
        }
    }
}

// Sensor packets
pub const BUMP_WHEEL_DROPS: SensorDescriptor = SensorDescriptor::new(7, WireFormat::U8, "bump_wheel_drops");
pub const WALL: SensorDescriptor = SensorDescriptor::new(8, WireFormat::U8, "wall");
pub const CLIFF_LEFT: SensorDescriptor = SensorDescriptor::new(9, WireFormat::U8, "cliff_left");
pub const CLIFF_FRONT_LEFT: SensorDescriptor = SensorDescriptor::new(10, WireFormat::U8, "cliff_front_left");
pub const CLIFF_FRONT_RIGHT: SensorDescriptor = SensorDescriptor::new(11, WireFormat::U8, "cliff_front_right");
pub const CLIFF_RIGHT: SensorDescriptor = SensorDescriptor::new(12, WireFormat::U8, "cliff_right");
pub const VIRTUAL_WALL: SensorDescriptor = SensorDescriptor::new(13, WireFormat::U8, "virtual_wall");
pub const WHEEL_OVERCURRENT: SensorDescriptor = SensorDescriptor::new(14, WireFormat::U8, "wheel_overcurrent");
pub const DIRT_DETECT: SensorDescriptor = SensorDescriptor::new(15, WireFormat::U8, "dirt_detect");
pub const IR_CHARACTER_OMNI: SensorDescriptor = SensorDescriptor::new(17, WireFormat::U8, "ir_character_omni");
pub const BUTTONS: SensorDescriptor = SensorDescriptor::new(18, WireFormat::U8, "buttons");
pub const DISTANCE: SensorDescriptor = SensorDescriptor::new(19, WireFormat::I16, "distance");
pub const ANGLE: SensorDescriptor = SensorDescriptor::new(20, WireFormat::I16, "angle");
pub const CHARGING_STATE: SensorDescriptor = SensorDescriptor::new(21, WireFormat::U8, "charging_state");
pub const VOLTAGE: SensorDescriptor = SensorDescriptor::new(22, WireFormat::U16, "voltage");
pub const CURRENT: SensorDescriptor = SensorDescriptor::new(23, WireFormat::I16, "current");
pub const TEMPERATURE: SensorDescriptor = SensorDescriptor::new(24, WireFormat::I8, "temperature");
pub const BATTERY_CHARGE: SensorDescriptor = SensorDescriptor::new(25, WireFormat::U16, "battery_charge");
pub const BATTERY_CAPACITY: SensorDescriptor = SensorDescriptor::new(26, WireFormat::U16, "battery_capacity");
pub const WALL_SIGNAL: SensorDescriptor = SensorDescriptor::new(27, WireFormat::U16, "wall_signal");
pub const CLIFF_LEFT_SIGNAL: SensorDescriptor = SensorDescriptor::new(28, WireFormat::U16, "cliff_left_signal");
pub const CLIFF_FRONT_LEFT_SIGNAL: SensorDescriptor =
    SensorDescriptor::new(29, WireFormat::U16, "cliff_front_left_signal");
pub const CLIFF_FRONT_RIGHT_SIGNAL: SensorDescriptor =
    SensorDescriptor::new(30, WireFormat::U16, "cliff_front_right_signal");
pub const CLIFF_RIGHT_SIGNAL: SensorDescriptor = SensorDescriptor::new(31, WireFormat::U16, "cliff_right_signal");
pub const CHARGING_SOURCES_AVAILABLE: SensorDescriptor =
    SensorDescriptor::new(34, WireFormat::U8, "charging_sources_available");
pub const OI_MODE: SensorDescriptor = SensorDescriptor::new(35, WireFormat::U8, "oi_mode");
pub const SONG_NUMBER: SensorDescriptor = SensorDescriptor::new(36, WireFormat::U8, "song_number");
pub const SONG_PLAYING: SensorDescriptor = SensorDescriptor::new(37, WireFormat::U8, "song_playing");
pub const STREAM_PACKETS: SensorDescriptor = SensorDescriptor::new(38, WireFormat::U8, "stream_packets");
pub const REQUESTED_VELOCITY: SensorDescriptor = SensorDescriptor::new(39, WireFormat::I16, "requested_velocity");
pub const REQUESTED_RADIUS: SensorDescriptor = SensorDescriptor::new(40, WireFormat::I16, "requested_radius");
pub const REQUESTED_RIGHT_VELOCITY: SensorDescriptor =
    SensorDescriptor::new(41, WireFormat::I16, "requested_right_velocity");
pub const REQUESTED_LEFT_VELOCITY: SensorDescriptor =
    SensorDescriptor::new(42, WireFormat::I16, "requested_left_velocity");
pub const LEFT_ENCODER: SensorDescriptor = SensorDescriptor::new(43, WireFormat::U16, "left_encoder");
pub const RIGHT_ENCODER: SensorDescriptor = SensorDescriptor::new(44, WireFormat::U16, "right_encoder");
pub const LIGHT_BUMPER: SensorDescriptor = SensorDescriptor::new(45, WireFormat::U8, "light_bumper");
pub const LIGHT_BUMP_LEFT: SensorDescriptor = SensorDescriptor::new(46, WireFormat::U16, "light_bump_left");
pub const LIGHT_BUMP_FRONT_LEFT: SensorDescriptor =
    SensorDescriptor::new(47, WireFormat::U16, "light_bump_front_left");
pub const LIGHT_BUMP_CENTER_LEFT: SensorDescriptor =
    SensorDescriptor::new(48, WireFormat::U16, "light_bump_center_left");
pub const LIGHT_BUMP_CENTER_RIGHT: SensorDescriptor =
    SensorDescriptor::new(49, WireFormat::U16, "light_bump_center_right");
pub const LIGHT_BUMP_FRONT_RIGHT: SensorDescriptor =
    SensorDescriptor::new(50, WireFormat::U16, "light_bump_front_right");
pub const LIGHT_BUMP_RIGHT: SensorDescriptor = SensorDescriptor::new(51, WireFormat::U16, "light_bump_right");
pub const IR_CHARACTER_LEFT: SensorDescriptor = SensorDescriptor::new(52, WireFormat::U8, "ir_character_left");
pub const IR_CHARACTER_RIGHT: SensorDescriptor = SensorDescriptor::new(53, WireFormat::U8, "ir_character_right");
pub const LEFT_MOTOR_CURRENT: SensorDescriptor = SensorDescriptor::new(54, WireFormat::I16, "left_motor_current");
pub const RIGHT_MOTOR_CURRENT: SensorDescriptor = SensorDescriptor::new(55, WireFormat::I16, "right_motor_current");
pub const MAIN_BRUSH_MOTOR_CURRENT: SensorDescriptor =
    SensorDescriptor::new(56, WireFormat::I16, "main_brush_motor_current");
pub const SIDE_BRUSH_MOTOR_CURRENT: SensorDescriptor =
    SensorDescriptor::new(57, WireFormat::I16, "side_brush_motor_current");
pub const STASIS: SensorDescriptor = SensorDescriptor::new(58, WireFormat::U8, "stasis");

// Bulk groups
pub const ALL_SCI: BulkDescriptor = BulkDescriptor {
    name: "all_sci",
    members: &[7, 8, 9, 10, 11, 12, 13, 14, 15, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26],
};
pub const ENCODERS: BulkDescriptor = BulkDescriptor {
    name: "encoders",
    members: &[LEFT_ENCODER.id, RIGHT_ENCODER.id],
};

/// Every scalar packet of the standard table
pub const STANDARD_SENSORS: &[SensorDescriptor] = &[
    BUMP_WHEEL_DROPS,
    WALL,
    CLIFF_LEFT,
    CLIFF_FRONT_LEFT,
    CLIFF_FRONT_RIGHT,
    CLIFF_RIGHT,
    VIRTUAL_WALL,
    WHEEL_OVERCURRENT,
    DIRT_DETECT,
    IR_CHARACTER_OMNI,
    BUTTONS,
    DISTANCE,
    ANGLE,
    CHARGING_STATE,
    VOLTAGE,
    CURRENT,
    TEMPERATURE,
    BATTERY_CHARGE,
    BATTERY_CAPACITY,
    WALL_SIGNAL,
    CLIFF_LEFT_SIGNAL,
    CLIFF_FRONT_LEFT_SIGNAL,
    CLIFF_FRONT_RIGHT_SIGNAL,
    CLIFF_RIGHT_SIGNAL,
    CHARGING_SOURCES_AVAILABLE,
    OI_MODE,
    SONG_NUMBER,
    SONG_PLAYING,
    STREAM_PACKETS,
    REQUESTED_VELOCITY,
    REQUESTED_RADIUS,
    REQUESTED_RIGHT_VELOCITY,
    REQUESTED_LEFT_VELOCITY,
    LEFT_ENCODER,
    RIGHT_ENCODER,
    LIGHT_BUMPER,
    LIGHT_BUMP_LEFT,
    LIGHT_BUMP_FRONT_LEFT,
    LIGHT_BUMP_CENTER_LEFT,
    LIGHT_BUMP_CENTER_RIGHT,
    LIGHT_BUMP_FRONT_RIGHT,
    LIGHT_BUMP_RIGHT,
    IR_CHARACTER_LEFT,
    IR_CHARACTER_RIGHT,
    LEFT_MOTOR_CURRENT,
    RIGHT_MOTOR_CURRENT,
    MAIN_BRUSH_MOTOR_CURRENT,
    SIDE_BRUSH_MOTOR_CURRENT,
    STASIS,
];

pub const STANDARD_BULKS: &[BulkDescriptor] = &[ALL_SCI, ENCODERS];

/// Immutable lookup table of sensor descriptors
#[derive(Debug)]
pub struct SensorRegistry {
    entries: Vec<SensorEntry>,
    by_id: HashMap<u8, usize>,
    by_name: HashMap<&'static str, usize>,
}

impl SensorRegistry {
    /// Build a registry, rejecting duplicate ids/names and bulk groups with unknown members
    pub fn new(sensors: &[SensorDescriptor], bulks: &[BulkDescriptor]) -> Result<Self> {
        let mut ids = HashSet::new();
        let mut names = HashSet::new();

        for sensor in sensors {
            if !ids.insert(sensor.id) {
                return Err(OiError::DuplicateSensor {
                    what: "id",
                    key: sensor.id.to_string(),
                });
            }
            if !names.insert(sensor.name) {
                return Err(OiError::DuplicateSensor {
                    what: "name",
                    key: sensor.name.to_string(),
                });
            }
        }

        for bulk in bulks {
            if !names.insert(bulk.name) {
                return Err(OiError::DuplicateSensor {
                    what: "name",
                    key: bulk.name.to_string(),
                });
            }
            if let Some(&missing) = bulk.members.iter().find(|&&id| !ids.contains(&id)) {
                return Err(OiError::UnknownSensorId(missing));
            }
        }

        Ok(Self::index(sensors, bulks))
    }

    /// The standard Open Interface table, built once per process
    pub fn standard() -> &'static SensorRegistry {
        static STANDARD: OnceLock<SensorRegistry> = OnceLock::new();
        STANDARD.get_or_init(|| Self::index(STANDARD_SENSORS, STANDARD_BULKS))
    }

    fn index(sensors: &[SensorDescriptor], bulks: &[BulkDescriptor]) -> Self {
        let entries: Vec<SensorEntry> = sensors
            .iter()
            .map(|&d| SensorEntry::Scalar(d))
            .chain(bulks.iter().map(|&b| SensorEntry::Bulk(b)))
            .collect();

        let mut by_id = HashMap::with_capacity(sensors.len());
        let mut by_name = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if let SensorEntry::Scalar(d) = entry {
                by_id.insert(d.id, i);
            }
            by_name.insert(entry.name(), i);
        }

        Self {
            entries,
            by_id,
            by_name,
        }
    }

    pub fn by_id(&self, id: u8) -> Result<&SensorDescriptor> {
        match self.by_id.get(&id).map(|&i| &self.entries[i]) {
            Some(SensorEntry::Scalar(d)) => Ok(d),
            _ => Err(OiError::UnknownSensorId(id)),
        }
    }

    /// Look up a scalar sensor by name. Bulk names are not scalars and fail here.
    pub fn by_name(&self, name: &str) -> Result<&SensorDescriptor> {
        match self.entry(name)? {
            SensorEntry::Scalar(d) => Ok(d),
            SensorEntry::Bulk(_) => Err(OiError::UnknownSensorName(name.to_string())),
        }
    }

    pub fn entry(&self, name: &str) -> Result<&SensorEntry> {
        self.by_name
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| OiError::UnknownSensorName(name.to_string()))
    }

    /// Resolve a name to the ordered list of scalar descriptors it stands for
    pub fn expand(&self, name: &str) -> Result<Vec<&SensorDescriptor>> {
        match self.entry(name)? {
            SensorEntry::Scalar(d) => Ok(vec![d]),
            SensorEntry::Bulk(b) => b.members.iter().map(|&id| self.by_id(id)).collect(),
        }
    }

    /// Expand several names in order, keeping duplicates
    pub fn expand_all<S: AsRef<str>>(&self, names: &[S]) -> Result<Vec<&SensorDescriptor>> {
        let mut out = Vec::with_capacity(names.len());
        for name in names {
            out.extend(self.expand(name.as_ref())?);
        }
        Ok(out)
    }

    pub fn sensors(&self) -> impl Iterator<Item = &SensorDescriptor> {
        self.entries.iter().filter_map(|e| match e {
            SensorEntry::Scalar(d) => Some(d),
            SensorEntry::Bulk(_) => None,
        })
    }

    pub fn bulks(&self) -> impl Iterator<Item = &BulkDescriptor> {
        self.entries.iter().filter_map(|e| match e {
            SensorEntry::Bulk(b) => Some(b),
            SensorEntry::Scalar(_) => None,
        })
    }
}

/// Readings decoded from one frame or query, in wire order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SensorFrame {
    readings: Vec<(&'static str, SensorValue)>,
}

impl SensorFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &'static str, value: SensorValue) {
        self.readings.push((name, value));
    }

    /// First reading with this name
    pub fn get(&self, name: &str) -> Option<&SensorValue> {
        self.readings.iter().find(|(n, _)| *n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &SensorValue)> {
        self.readings.iter().map(|(n, v)| (*n, v))
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }
}

impl Serialize for SensorFrame {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.readings.len()))?;
        for (name, value) in &self.readings {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_and_id_lookups_agree() {
        let registry = SensorRegistry::standard();
        for sensor in STANDARD_SENSORS {
            let by_name = registry.by_name(sensor.name).unwrap();
            assert_eq!(registry.by_id(by_name.id).unwrap(), by_name);
            assert_eq!(by_name, sensor);
        }
    }

    #[test]
    fn test_standard_table_is_valid() {
        // The lazily built standard table skips validation, so check it here
        let checked = SensorRegistry::new(STANDARD_SENSORS, STANDARD_BULKS).unwrap();
        assert_eq!(checked.sensors().count(), STANDARD_SENSORS.len());
        assert_eq!(checked.bulks().count(), 2);
    }

    #[test]
    fn test_unknown_lookups_fail() {
        let registry = SensorRegistry::standard();
        assert!(matches!(registry.by_id(16), Err(OiError::UnknownSensorId(16))));
        assert!(matches!(registry.by_id(255), Err(OiError::UnknownSensorId(255))));
        assert!(matches!(
            registry.by_name("warp_drive"),
            Err(OiError::UnknownSensorName(_))
        ));
        // bulk groups have no scalar descriptor
        assert!(registry.by_name("all_sci").is_err());
    }

    #[test]
    fn test_bulk_expansion() {
        let registry = SensorRegistry::standard();
        let encoders = registry.expand("encoders").unwrap();
        let names: Vec<_> = encoders.iter().map(|d| d.name).collect();
        assert_eq!(names, ["left_encoder", "right_encoder"]);

        let all_sci = registry.expand("all_sci").unwrap();
        assert_eq!(all_sci.len(), ALL_SCI.members.len());
        assert_eq!(all_sci[0].name, "bump_wheel_drops");
        assert_eq!(all_sci.last().unwrap().name, "battery_capacity");

        let mixed = registry.expand_all(&["wall", "encoders"]).unwrap();
        assert_eq!(mixed.len(), 3);
    }

    #[test]
    fn test_duplicates_rejected() {
        let dup_id = [WALL, SensorDescriptor::new(8, WireFormat::U8, "other")];
        assert!(matches!(
            SensorRegistry::new(&dup_id, &[]),
            Err(OiError::DuplicateSensor { what: "id", .. })
        ));

        let dup_name = [WALL, SensorDescriptor::new(9, WireFormat::U8, "wall")];
        assert!(matches!(
            SensorRegistry::new(&dup_name, &[]),
            Err(OiError::DuplicateSensor { what: "name", .. })
        ));

        let bad_bulk = BulkDescriptor {
            name: "group",
            members: &[8, 99],
        };
        assert!(matches!(
            SensorRegistry::new(&[WALL], &[bad_bulk]),
            Err(OiError::UnknownSensorId(99))
        ));
    }

    #[test]
    fn test_wire_format_decode() {
        assert_eq!(WireFormat::I8.decode(&[0xFE]).unwrap(), SensorValue::I8(-2));
        assert_eq!(WireFormat::U16.decode(&[0x01, 0xF4]).unwrap(), SensorValue::U16(500));
        assert_eq!(WireFormat::I16.decode(&[0xFF, 0x38]).unwrap(), SensorValue::I16(-200));
        assert_eq!(
            WireFormat::Block(3).decode(&[1, 2, 3]).unwrap(),
            SensorValue::Block(vec![1, 2, 3])
        );
        assert!(WireFormat::U16.decode(&[1]).is_err());
    }

    #[test]
    fn test_encode_rejects_mismatched_value() {
        let mut out = Vec::new();
        assert!(WireFormat::U8.encode(&SensorValue::I16(3), &mut out).is_err());
        assert!(WireFormat::Block(2).encode(&SensorValue::Block(vec![1]), &mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_frame_serializes_in_wire_order() {
        let mut frame = SensorFrame::new();
        frame.push("wall", SensorValue::U8(1));
        frame.push("distance", SensorValue::I16(-12));
        frame.push("bump_wheel_drops", SensorValue::U8(0));
        let json = serde_json::to_string(&frame).unwrap();
        assert_eq!(json, r#"{"wall":1,"distance":-12,"bump_wheel_drops":0}"#);
        assert_eq!(frame.get("distance"), Some(&SensorValue::I16(-12)));
        assert_eq!(frame.get("angle"), None);
    }
}
