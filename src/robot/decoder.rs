// Streaming sensor frame decoder
//
// Frame format: [19, N, (id, value)*, checksum]
// - N counts the payload bytes only
// - all bytes of the frame, checksum included, sum to 0 mod 256
//
// The link is unreliable, so decoding starts by hunting for the magic byte.
// A corrupt frame can make the hunt land mid-frame; the checksum catches that.

use tracing::{debug, warn};

use super::error::{OiError, Result};
use super::sensors::{SensorDescriptor, SensorFrame, SensorRegistry, SensorValue};
use super::transport::ByteTransport;

/// First byte of every streamed frame
pub const MAGIC: u8 = 19;

/// Decoder states, in the order one decode walks through them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    SeekingMagic,
    ReadLength,
    ReadBody { len: u8 },
    Validate,
}

/// Stateless (between calls) decoder bound to a sensor registry
#[derive(Debug, Clone, Copy)]
pub struct StreamDecoder<'r> {
    registry: &'r SensorRegistry,
}

impl Default for StreamDecoder<'static> {
    fn default() -> Self {
        Self::new(SensorRegistry::standard())
    }
}

impl<'r> StreamDecoder<'r> {
    pub fn new(registry: &'r SensorRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &'r SensorRegistry {
        self.registry
    }

    /// Read one complete, validated frame from the transport
    ///
    /// On a checksum failure the transport's buffered input is discarded before
    /// returning; calling again starts over at the magic byte hunt.
    pub fn decode<T: ByteTransport + ?Sized>(&self, transport: &mut T) -> Result<SensorFrame> {
        let mut state = State::SeekingMagic;
        let mut frame = Vec::new();
        let mut byte = [0u8; 1];
        let mut skipped = 0usize;

        loop {
            state = match state {
                State::SeekingMagic => {
                    transport.read_exact(&mut byte)?;
                    if byte[0] != MAGIC {
                        skipped += 1;
                        continue;
                    }
                    if skipped > 0 {
                        debug!("Skipped {} bytes before frame start", skipped);
                    }
                    frame.push(MAGIC);
                    State::ReadLength
                }
                State::ReadLength => {
                    transport.read_exact(&mut byte)?;
                    frame.push(byte[0]);
                    State::ReadBody { len: byte[0] }
                }
                State::ReadBody { len } => {
                    let start = frame.len();
                    frame.resize(start + len as usize + 1, 0);
                    transport.read_exact(&mut frame[start..])?;
                    State::Validate
                }
                State::Validate => {
                    let sum = checksum(&frame);
                    if sum != 0 {
                        warn!("Dropping frame with bad checksum (sum 0x{:02X})", sum);
                        transport.discard_buffered()?;
                        return Err(OiError::Checksum { sum });
                    }
                    // strip magic, length and trailing checksum
                    let payload = &frame[2..frame.len() - 1];
                    return self.parse_payload(payload);
                }
            };
        }
    }

    /// Parse a streamed payload of (id, value) tuples
    pub fn parse_payload(&self, payload: &[u8]) -> Result<SensorFrame> {
        let mut frame = SensorFrame::new();
        let mut cursor = 0;

        while cursor < payload.len() {
            let sensor = self.registry.by_id(payload[cursor])?;
            let start = cursor + 1;
            let end = start + sensor.format.width();
            if end > payload.len() {
                return Err(OiError::MalformedFrame {
                    reason: format!(
                        "sensor {} needs {} bytes at offset {}, payload has {}",
                        sensor.name,
                        sensor.format.width(),
                        start,
                        payload.len()
                    ),
                });
            }
            frame.push(sensor.name, sensor.format.decode(&payload[start..end])?);
            cursor = end;
        }

        Ok(frame)
    }

    /// Parse a query-list response: bare values in request order
    pub fn parse_query_response(
        &self,
        sensors: &[&SensorDescriptor],
        response: &[u8],
    ) -> Result<SensorFrame> {
        let expected = response_len(sensors);
        if response.len() != expected {
            return Err(OiError::MalformedFrame {
                reason: format!("query response is {} bytes, expected {}", response.len(), expected),
            });
        }

        let mut frame = SensorFrame::new();
        let mut cursor = 0;
        for sensor in sensors {
            let end = cursor + sensor.format.width();
            frame.push(sensor.name, sensor.format.decode(&response[cursor..end])?);
            cursor = end;
        }
        Ok(frame)
    }
}

/// Total value bytes a query-list for these sensors returns
pub fn response_len(sensors: &[&SensorDescriptor]) -> usize {
    sensors.iter().map(|s| s.format.width()).sum()
}

/// Byte sum mod 256; a valid frame sums to 0
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |sum, &b| sum.wrapping_add(b))
}

/// Build a valid streamed frame, as the robot would send it
pub fn encode_frame(registry: &SensorRegistry, readings: &[(u8, SensorValue)]) -> Result<Vec<u8>> {
    let mut payload = Vec::new();
    for (id, value) in readings {
        let sensor = registry.by_id(*id)?;
        payload.push(*id);
        sensor.format.encode(value, &mut payload)?;
    }

    let len = u8::try_from(payload.len()).map_err(|_| OiError::MalformedFrame {
        reason: format!("payload of {} bytes does not fit one frame", payload.len()),
    })?;

    let mut frame = Vec::with_capacity(payload.len() + 3);
    frame.push(MAGIC);
    frame.push(len);
    frame.extend_from_slice(&payload);
    frame.push(checksum(&frame).wrapping_neg());
    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::sensors::{SensorDescriptor, WireFormat};
    use crate::robot::transport::MockTransport;

    fn decode_bytes(bytes: &[u8]) -> Result<SensorFrame> {
        let mut mock = MockTransport::new();
        mock.inject(bytes);
        StreamDecoder::default().decode(&mut mock)
    }

    fn bump_frame() -> Vec<u8> {
        let ck = (256 - (19 + 2 + 7 + 1) % 256) as u8;
        vec![19, 2, 7, 1, ck]
    }

    #[test]
    fn test_decode_single_sensor() {
        let frame = decode_bytes(&bump_frame()).unwrap();
        assert_eq!(frame.len(), 1);
        assert_eq!(frame.get("bump_wheel_drops"), Some(&SensorValue::U8(1)));
    }

    #[test]
    fn test_leading_garbage_skipped() {
        let mut bytes = vec![0x41];
        bytes.extend(bump_frame());
        assert_eq!(decode_bytes(&bytes).unwrap(), decode_bytes(&bump_frame()).unwrap());
    }

    #[test]
    fn test_resync_after_junk_of_any_length() {
        let expected = decode_bytes(&bump_frame()).unwrap();
        for junk_len in 0..=255usize {
            let mut bytes: Vec<u8> = (0..junk_len)
                .map(|i| (i * 7 + 3) as u8)
                .map(|b| if b == MAGIC { 0 } else { b })
                .collect();
            bytes.extend(bump_frame());
            assert_eq!(decode_bytes(&bytes).unwrap(), expected, "junk length {}", junk_len);
        }
    }

    #[test]
    fn test_checksum_failure_then_recovery() {
        let mock = MockTransport::new();
        let mut port = mock.clone();
        let decoder = StreamDecoder::default();

        mock.inject(&[19, 1, 255, 0x42]);
        assert!(matches!(decoder.decode(&mut port), Err(OiError::Checksum { .. })));
        assert_eq!(mock.discards(), 1);

        mock.inject(&bump_frame());
        let frame = decoder.decode(&mut port).unwrap();
        assert_eq!(frame.get("bump_wheel_drops"), Some(&SensorValue::U8(1)));
    }

    #[test]
    fn test_checksum_failure_discards_buffered_input() {
        let mock = MockTransport::new();
        let mut port = mock.clone();
        let mut bytes = vec![19, 2, 7, 1, 0];
        bytes.extend(bump_frame());
        mock.inject(&bytes);

        assert!(StreamDecoder::default().decode(&mut port).is_err());
        assert_eq!(mock.pending(), 0);
    }

    #[test]
    fn test_unknown_sensor_is_fatal() {
        // id 16 is not in the table
        let mut frame = vec![19, 2, 16, 0];
        frame.push(checksum(&frame).wrapping_neg());
        assert!(matches!(decode_bytes(&frame), Err(OiError::UnknownSensorId(16))));
    }

    #[test]
    fn test_truncated_field_is_malformed() {
        // distance is 2 bytes wide but only one value byte follows
        let mut frame = vec![19, 2, 19, 5];
        frame.push(checksum(&frame).wrapping_neg());
        assert!(matches!(decode_bytes(&frame), Err(OiError::MalformedFrame { .. })));
    }

    #[test]
    fn test_empty_payload() {
        let frame = decode_bytes(&[19, 0, 237]).unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn test_transport_error_propagates() {
        assert!(matches!(decode_bytes(&[0x41, 19, 2, 7]), Err(OiError::Io(_))));
    }

    #[test]
    fn test_round_trip_every_width() {
        const TABLE: &[SensorDescriptor] = &[
            SensorDescriptor::new(1, WireFormat::U8, "a"),
            SensorDescriptor::new(2, WireFormat::I8, "b"),
            SensorDescriptor::new(3, WireFormat::U16, "c"),
            SensorDescriptor::new(4, WireFormat::I16, "d"),
            SensorDescriptor::new(5, WireFormat::Block(3), "e"),
        ];
        let registry = SensorRegistry::new(TABLE, &[]).unwrap();
        let readings = vec![
            (1, SensorValue::U8(250)),
            (2, SensorValue::I8(-128)),
            (3, SensorValue::U16(65535)),
            (4, SensorValue::I16(-32768)),
            (5, SensorValue::Block(vec![19, 0, 255])),
        ];

        let bytes = encode_frame(&registry, &readings).unwrap();
        assert_eq!(checksum(&bytes), 0);

        let mut mock = MockTransport::new();
        mock.inject(&bytes);
        let frame = StreamDecoder::new(&registry).decode(&mut mock).unwrap();

        let decoded: Vec<_> = frame.iter().map(|(n, v)| (n, v.clone())).collect();
        assert_eq!(
            decoded,
            vec![
                ("a", SensorValue::U8(250)),
                ("b", SensorValue::I8(-128)),
                ("c", SensorValue::U16(65535)),
                ("d", SensorValue::I16(-32768)),
                ("e", SensorValue::Block(vec![19, 0, 255])),
            ]
        );
    }

    #[test]
    fn test_encoded_frames_always_validate() {
        let registry = SensorRegistry::standard();
        for raw in [0u16, 1, 19, 255, 256, 4660, 65535] {
            let readings = [
                (43, SensorValue::U16(raw)),
                (44, SensorValue::U16(raw.wrapping_mul(3))),
                (7, SensorValue::U8(raw as u8)),
            ];
            let bytes = encode_frame(registry, &readings).unwrap();
            assert_eq!(checksum(&bytes), 0);
            let frame = decode_bytes(&bytes).unwrap();
            assert_eq!(frame.get("left_encoder"), Some(&SensorValue::U16(raw)));
        }
    }

    #[test]
    fn test_parse_query_response() {
        let registry = SensorRegistry::standard();
        let decoder = StreamDecoder::new(registry);
        let sensors = registry.expand_all(&["left_encoder", "temperature", "right_encoder"]).unwrap();
        assert_eq!(response_len(&sensors), 5);

        let frame = decoder
            .parse_query_response(&sensors, &[0x12, 0x34, 0xF6, 0xFF, 0xFE])
            .unwrap();
        assert_eq!(frame.get("left_encoder"), Some(&SensorValue::U16(0x1234)));
        assert_eq!(frame.get("temperature"), Some(&SensorValue::I8(-10)));
        assert_eq!(frame.get("right_encoder"), Some(&SensorValue::U16(0xFFFE)));

        assert!(decoder.parse_query_response(&sensors, &[0x12]).is_err());
    }
}
