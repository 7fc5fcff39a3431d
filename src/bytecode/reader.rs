use crate::error::LoadError;

/// Cursor over a bytecode buffer. Every read is bounds-checked.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// How far in we are.
    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize, wanted: &'static str) -> Result<&'a [u8], LoadError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(LoadError::Truncated {
                offset: self.bytes.len(),
                wanted,
            })?;
        let out = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn read_array<const N: usize>(&mut self, wanted: &'static str) -> Result<[u8; N], LoadError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N, wanted)?);
        Ok(out)
    }

    pub fn read_u8(&mut self, wanted: &'static str) -> Result<u8, LoadError> {
        Ok(self.read_array::<1>(wanted)?[0])
    }

    pub fn read_u16(&mut self, wanted: &'static str) -> Result<u16, LoadError> {
        Ok(u16::from_be_bytes(self.read_array(wanted)?))
    }

    pub fn read_u32(&mut self, wanted: &'static str) -> Result<u32, LoadError> {
        Ok(u32::from_be_bytes(self.read_array(wanted)?))
    }

    pub fn read_u64(&mut self, wanted: &'static str) -> Result<u64, LoadError> {
        Ok(u64::from_be_bytes(self.read_array(wanted)?))
    }

    pub fn read_set(&mut self, wanted: &'static str) -> Result<[u8; 32], LoadError> {
        self.read_array(wanted)
    }

    /// A `u32` length, then that many bytes.
    pub fn read_str(&mut self, wanted: &'static str) -> Result<&'a [u8], LoadError> {
        let len = self.read_u32(wanted)?;
        let len = usize::try_from(len).map_err(|_| LoadError::Overlarge {
            what: wanted,
            value: len as u64,
        })?;
        self.read_bytes(len, wanted)
    }

    /// Like [`read_str`](Self::read_str), but it has to be UTF-8.
    pub fn read_utf8(&mut self, wanted: &'static str) -> Result<&'a str, LoadError> {
        let offset = self.pos;
        let raw = self.read_str(wanted)?;
        std::str::from_utf8(raw).map_err(|_| LoadError::InvalidUtf8 {
            what: wanted,
            offset,
        })
    }
}

#[test]
fn reads_big_endian() {
    let bytes = [
        0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
    ];
    let mut r = ByteReader::new(&bytes);
    assert_eq!(r.read_u8("a").unwrap(), 0x01);
    assert_eq!(r.read_u16("b").unwrap(), 0x0203);
    assert_eq!(r.read_u32("c").unwrap(), 0x0405_0607);
    assert_eq!(r.read_u64("d").unwrap(), 0x0809_0A0B_0C0D_0E0F);
    assert_eq!(r.remaining(), 0);
    assert!(matches!(
        r.read_u8("e"),
        Err(LoadError::Truncated { offset: 15, wanted: "e" })
    ));
}

#[test]
fn strings_are_length_prefixed() {
    let mut r = ByteReader::new(b"\x00\x00\x00\x03abc\x00\x00\x00\x02\xff\xfe\x00\x00\x00\x09xy");
    assert_eq!(r.read_str("s").unwrap(), b"abc");
    assert!(matches!(
        r.read_utf8("label"),
        Err(LoadError::InvalidUtf8 { what: "label", offset: 7 })
    ));
    assert!(matches!(
        r.read_str("long"),
        Err(LoadError::Truncated { wanted: "long", .. })
    ));
}
