//! Big-endian frame encoding shared by every wire object.
//!
//! Writers append to a plain `Vec<u8>`; reads go through [`Reader`], which
//! returns `Codec` errors instead of panicking because its input arrives
//! from the network.

use crate::error::{CoveredError, Result};

pub fn put_u8(out: &mut Vec<u8>, v: u8) {
    out.push(v);
}

pub fn put_u32_be(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u64_be(out: &mut Vec<u8>, v: u64) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_i32_be(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_be_bytes());
}

pub fn put_f32_be(out: &mut Vec<u8>, v: f32) {
    out.extend_from_slice(&v.to_bits().to_be_bytes());
}

pub fn put_bytes(out: &mut Vec<u8>, v: &[u8]) {
    out.extend_from_slice(v);
}

/// A cursor over a received frame with offset tracking.
pub struct Reader<'a> {
    buf: &'a [u8],
    off: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, off: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.off)
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .off
            .checked_add(n)
            .ok_or_else(|| CoveredError::Codec("offset overflow".into()))?;
        if end > self.buf.len() {
            return Err(CoveredError::Codec(format!(
                "truncated frame: need {n} bytes, have {}",
                self.remaining()
            )));
        }
        let slice = &self.buf[self.off..end];
        self.off = end;
        Ok(slice)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn u32_be(&mut self) -> Result<u32> {
        let raw = self.take(4)?;
        Ok(u32::from_be_bytes(raw.try_into().expect("4-byte slice")))
    }

    pub fn u64_be(&mut self) -> Result<u64> {
        let raw = self.take(8)?;
        Ok(u64::from_be_bytes(raw.try_into().expect("8-byte slice")))
    }

    pub fn i32_be(&mut self) -> Result<i32> {
        let raw = self.take(4)?;
        Ok(i32::from_be_bytes(raw.try_into().expect("4-byte slice")))
    }

    pub fn f32_be(&mut self) -> Result<f32> {
        Ok(f32::from_bits(self.u32_be()?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn scalar_roundtrips() {
        let mut out = Vec::new();
        put_u8(&mut out, 7);
        put_u32_be(&mut out, 0xdead_beef);
        put_u64_be(&mut out, u64::MAX - 1);
        put_i32_be(&mut out, -128);
        put_f32_be(&mut out, 1.5);
        let mut r = Reader::new(&out);
        assert_eq!(r.u8().unwrap(), 7);
        assert_eq!(r.u32_be().unwrap(), 0xdead_beef);
        assert_eq!(r.u64_be().unwrap(), u64::MAX - 1);
        assert_eq!(r.i32_be().unwrap(), -128);
        assert_eq!(r.f32_be().unwrap(), 1.5);
        assert!(r.is_empty());
    }

    #[test]
    fn overread_is_an_error() {
        let mut r = Reader::new(&[1, 2, 3]);
        assert!(r.take(4).is_err());
        // A failed take must not consume anything.
        assert_eq!(r.take(3).unwrap(), &[1, 2, 3]);
    }

    proptest! {
        #[test]
        fn u64_roundtrip_prop(v in any::<u64>()) {
            let mut out = Vec::new();
            put_u64_be(&mut out, v);
            prop_assert_eq!(Reader::new(&out).u64_be().unwrap(), v);
        }

        #[test]
        fn f32_bits_roundtrip_prop(v in any::<f32>()) {
            let mut out = Vec::new();
            put_f32_be(&mut out, v);
            let back = Reader::new(&out).f32_be().unwrap();
            prop_assert_eq!(back.to_bits(), v.to_bits());
        }

        #[test]
        fn i32_roundtrip_prop(v in any::<i32>()) {
            let mut out = Vec::new();
            put_i32_be(&mut out, v);
            prop_assert_eq!(Reader::new(&out).i32_be().unwrap(), v);
        }
    }
}
