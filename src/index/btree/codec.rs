use byteorder::{ByteOrder, LittleEndian};

/// Capability bound for index keys: a total order plus a fixed-size binary
/// encoding, so node fan-out can be computed from the page capacity.
pub trait KeyCodec: Copy + Ord + Send + Sync + 'static {
    const ENCODED_SIZE: usize;

    fn encode(&self, buf: &mut [u8]);
    fn decode(buf: &[u8]) -> Self;
}

impl KeyCodec for i32 {
    const ENCODED_SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i32(buf)
    }
}

impl KeyCodec for u32 {
    const ENCODED_SIZE: usize = 4;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u32(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u32(buf)
    }
}

impl KeyCodec for i64 {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_i64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_i64(buf)
    }
}

impl KeyCodec for u64 {
    const ENCODED_SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        LittleEndian::write_u64(buf, *self);
    }

    fn decode(buf: &[u8]) -> Self {
        LittleEndian::read_u64(buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_keys_round_trip() {
        let mut buf = [0u8; 8];
        for value in [i64::MIN, -1, 0, 1, i64::MAX] {
            value.encode(&mut buf);
            assert_eq!(i64::decode(&buf), value);
        }
    }

    #[test]
    fn encoded_sizes() {
        assert_eq!(<i32 as KeyCodec>::ENCODED_SIZE, 4);
        assert_eq!(<u64 as KeyCodec>::ENCODED_SIZE, 8);
    }
}
