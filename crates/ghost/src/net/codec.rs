use glam::DVec3;

use crate::error::CodecError;
use crate::state::{State, Transform};

pub const STATE_LEN: usize = 24;
pub const MAX_STATES_PER_PACKET: usize = 21;
pub const MIN_SERVER_PACKET_LEN: usize = STATE_LEN;
pub const MAX_SERVER_PACKET_LEN: usize = MAX_STATES_PER_PACKET * STATE_LEN;

/// Bytes of a record that follow the peer id.
pub const RECORD_AFTER_ID_LEN: usize = STATE_LEN - 1;
/// Bytes of a record that follow the peer id and timestamp.
pub const RECORD_AFTER_TIMESTAMP_LEN: usize = STATE_LEN - 5;

const ROTATION_STEPS: f64 = 256.0;
const DEGREES: f64 = 360.0;

/// Writes big-endian fields into a borrowed buffer, advancing its own cursor.
pub struct WireWriter<'a> {
    buf: &'a mut [u8],
    pos: usize,
}

impl<'a> WireWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), CodecError> {
        if bytes.len() > self.remaining() {
            return Err(CodecError::BufferFull {
                pos: self.pos,
                wanted: bytes.len(),
                len: self.buf.len(),
            });
        }
        self.buf[self.pos..self.pos + bytes.len()].copy_from_slice(bytes);
        self.pos += bytes.len();
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), CodecError> {
        self.put(&[value])
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), CodecError> {
        self.put(&value.to_be_bytes())
    }

    pub fn write_f32(&mut self, value: f32) -> Result<(), CodecError> {
        self.write_u32(value.to_bits())
    }

    /// Positions travel as single precision.
    pub fn write_locator(&mut self, value: f64) -> Result<(), CodecError> {
        self.write_f32(value as f32)
    }

    pub fn write_rotator(&mut self, angle: f64) -> Result<(), CodecError> {
        self.write_u8(quantize_rotation(angle))
    }
}

/// Reads big-endian fields from a borrowed buffer, advancing its own cursor.
pub struct WireReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if n > self.remaining() {
            return Err(CodecError::UnexpectedEnd {
                pos: self.pos,
                wanted: n,
                len: self.buf.len(),
            });
        }
        let bytes = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(bytes)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        self.take(n).map(|_| ())
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_f32(&mut self) -> Result<f32, CodecError> {
        self.read_u32().map(f32::from_bits)
    }

    pub fn read_locator(&mut self) -> Result<f64, CodecError> {
        self.read_f32().map(f64::from)
    }

    pub fn read_rotator(&mut self) -> Result<f64, CodecError> {
        self.read_u8().map(dequantize_rotation)
    }
}

/// Maps an angle in degrees onto one of 256 steps around the circle. 180 and -180 share step 0.
pub fn quantize_rotation(angle: f64) -> u8 {
    let normalized = (angle + 180.0).rem_euclid(DEGREES);
    let step = (normalized * ROTATION_STEPS / DEGREES).round() as u32;
    (step % ROTATION_STEPS as u32) as u8
}

/// Inverse of [`quantize_rotation`]; the result lies in [-180, 180).
pub fn dequantize_rotation(byte: u8) -> f64 {
    byte as f64 * DEGREES / ROTATION_STEPS - 180.0
}

pub fn encode_state(state: &State) -> Result<[u8; STATE_LEN], CodecError> {
    let mut buf = [0u8; STATE_LEN];
    write_state(&mut WireWriter::new(&mut buf), state)?;
    Ok(buf)
}

pub fn write_state(writer: &mut WireWriter<'_>, state: &State) -> Result<(), CodecError> {
    let position = state.position();
    let rotation = state.rotation();

    writer.write_u8(state.peer_id)?;
    writer.write_u32(state.timestamp)?;
    writer.write_u32(state.zone)?;
    writer.write_locator(position.x)?;
    writer.write_locator(position.y)?;
    writer.write_locator(position.z)?;
    writer.write_rotator(rotation.x)?;
    writer.write_rotator(rotation.y)?;
    writer.write_rotator(rotation.z)?;
    Ok(())
}

/// Reads the remainder of a record once its peer id and timestamp have been consumed.
pub fn read_state_body(
    reader: &mut WireReader<'_>,
    peer_id: u8,
    timestamp: u32,
) -> Result<State, CodecError> {
    let zone = reader.read_u32()?;
    let position = DVec3::new(
        reader.read_locator()?,
        reader.read_locator()?,
        reader.read_locator()?,
    );
    let rotation = DVec3::new(
        reader.read_rotator()?,
        reader.read_rotator()?,
        reader.read_rotator()?,
    );
    Ok(State::new(
        peer_id,
        timestamp,
        zone,
        Transform::new(position, rotation),
    ))
}

pub fn read_state(reader: &mut WireReader<'_>) -> Result<State, CodecError> {
    let peer_id = reader.read_u8()?;
    let timestamp = reader.read_u32()?;
    read_state_body(reader, peer_id, timestamp)
}

/// Checks the size of a packet received from the relay and returns how many records it holds.
pub fn record_count(len: usize) -> Result<usize, CodecError> {
    if !(MIN_SERVER_PACKET_LEN..=MAX_SERVER_PACKET_LEN).contains(&len) || len % STATE_LEN != 0 {
        return Err(CodecError::InvalidLength(len));
    }
    Ok(len / STATE_LEN)
}

pub fn decode_packet(data: &[u8]) -> Result<Vec<State>, CodecError> {
    let count = record_count(data.len())?;
    let mut reader = WireReader::new(data);
    let mut states = Vec::with_capacity(count);
    for _ in 0..count {
        states.push(read_state(&mut reader)?);
    }
    Ok(states)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn angle_error(a: f64, b: f64) -> f64 {
        let diff = (a - b).rem_euclid(360.0);
        diff.min(360.0 - diff)
    }

    fn sample_state() -> State {
        State::new(
            42,
            123_456,
            0xDEAD_BEEF,
            Transform::new(
                DVec3::new(1234.5678, -98.7654321, 0.1),
                DVec3::new(-179.0, 45.3, 179.6),
            ),
        )
    }

    #[test]
    fn test_state_layout() {
        let bytes = encode_state(&sample_state()).unwrap();

        assert_eq!(bytes.len(), STATE_LEN);
        assert_eq!(bytes[0], 42);
        assert_eq!(&bytes[1..5], &123_456u32.to_be_bytes());
        assert_eq!(&bytes[5..9], &0xDEAD_BEEFu32.to_be_bytes());
        assert_eq!(&bytes[9..13], &(1234.5678f64 as f32).to_bits().to_be_bytes());
    }

    #[test]
    fn test_state_round_trip_precision() {
        let state = sample_state();
        let decoded = decode_packet(&encode_state(&state).unwrap()).unwrap();
        assert_eq!(decoded.len(), 1);
        let decoded = decoded[0];

        assert_eq!(decoded.peer_id, state.peer_id);
        assert_eq!(decoded.timestamp, state.timestamp);
        assert_eq!(decoded.zone, state.zone);

        let expected = state.position().as_vec3().as_dvec3();
        assert_eq!(decoded.position(), expected);

        for (got, want) in decoded
            .rotation()
            .to_array()
            .iter()
            .zip(state.rotation().to_array())
        {
            assert!(angle_error(*got, want) <= 0.71, "{got} vs {want}");
        }
    }

    #[test]
    fn test_rotation_quantization_range() {
        for byte in 0..=u8::MAX {
            let angle = dequantize_rotation(byte);
            assert!((-180.0..180.0).contains(&angle));
            assert_eq!(quantize_rotation(angle), byte);
        }

        assert_eq!(quantize_rotation(-180.0), 0);
        assert_eq!(quantize_rotation(180.0), 0);
        assert_eq!(quantize_rotation(0.0), 128);
        assert_eq!(quantize_rotation(540.0), 0);
        assert_eq!(quantize_rotation(f64::NAN), 0);
    }

    #[test]
    fn test_rotation_error_bound() {
        let mut angle = -180.0;
        while angle < 180.0 {
            let back = dequantize_rotation(quantize_rotation(angle));
            assert!(angle_error(back, angle) <= 0.71, "{angle} -> {back}");
            angle += 0.37;
        }
    }

    #[test]
    fn test_packet_length_validation() {
        for len in [0, 23, 25, 505, 528] {
            assert!(matches!(
                decode_packet(&vec![0u8; len]),
                Err(CodecError::InvalidLength(l)) if l == len
            ));
        }

        assert_eq!(decode_packet(&[0u8; 48]).unwrap().len(), 2);
        assert_eq!(
            decode_packet(&[0u8; MAX_SERVER_PACKET_LEN]).unwrap().len(),
            MAX_STATES_PER_PACKET
        );
    }

    #[test]
    fn test_reader_bounds() {
        let mut reader = WireReader::new(&[1, 2, 3]);
        assert_eq!(reader.read_u8().unwrap(), 1);
        assert!(matches!(
            reader.read_u32(),
            Err(CodecError::UnexpectedEnd { pos: 1, wanted: 4, len: 3 })
        ));
        reader.skip(2).unwrap();
        assert!(reader.is_empty());
    }

    #[test]
    fn test_writer_bounds() {
        let mut buf = [0u8; 3];
        let mut writer = WireWriter::new(&mut buf);
        writer.write_u8(7).unwrap();
        assert!(writer.write_f32(1.0).is_err());
        assert_eq!(writer.position(), 1);
    }
}
