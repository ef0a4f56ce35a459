//! Utilities for representing values in cross-platform binary.
//!
//! All multi-byte values are encoded in little-endian byte order.
//!
//! `BinaryRead` and `BinaryWrite` are the two main features of this module.
//! They are implemented here for the integer primitives, strings, and generic
//! sequences; the architecture-level types implement them next to their own
//! definitions.
//!
//! # Example
//! ```
//! # use x86lite::common::serialization::*;
//! # use std::io::Cursor;
//! let mut f = Cursor::new(Vec::new());
//! "hello world".bin_write(&mut f).unwrap();
//! f.set_position(0);
//! assert_eq!(String::bin_read(&mut f).unwrap(), "hello world");
//! ```

use std::io::{self, Read, Write};
use std::{cmp, mem};

#[cfg(test)]
use std::io::Cursor;

/// Denotes that a type can be encoded as cross-platform binary.
pub trait BinaryWrite {
    fn bin_write<F: Write>(&self, f: &mut F) -> io::Result<()>;
}
/// Denotes that a type can be decoded from cross-platform binary.
pub trait BinaryRead: Sized {
    fn bin_read<F: Read>(f: &mut F) -> io::Result<Self>;
}

macro_rules! int_impl {
    ($($type:ty),+) => {
        $(impl BinaryWrite for $type {
            fn bin_write<F: Write>(&self, f: &mut F) -> io::Result<()> {
                f.write_all(&self.to_le_bytes())
            }
        }
        impl BinaryRead for $type {
            fn bin_read<F: Read>(f: &mut F) -> io::Result<Self> {
                let mut bytes = [0; mem::size_of::<Self>()];
                f.read_exact(&mut bytes)?;
                Ok(Self::from_le_bytes(bytes))
            }
        })+
    }
}
int_impl!(u64, u32, u16, u8, i64, i32, i16, i8);

macro_rules! extended_int_impl {
    ($($type:ty => $extended:ty),+) => {
        $(impl BinaryWrite for $type {
            fn bin_write<F: Write>(&self, f: &mut F) -> io::Result<()> {
                (*self as $extended).bin_write(f)
            }
        }
        impl BinaryRead for $type {
            fn bin_read<F: Read>(f: &mut F) -> io::Result<Self> {
                let val = <$extended>::bin_read(f)?;
                if val as $type as $extended != val {
                    return Err(io::ErrorKind::InvalidData.into());
                }
                Ok(val as $type)
            }
        })*
    }
}
extended_int_impl!(usize => u64);

#[test]
fn test_serialize_int() {
    let vals = [u64::MIN, u64::MAX, 0xdeadbeefdeadbeef, 0x0102030405060708];
    let mut cursor = Cursor::new(Vec::with_capacity(1024));
    macro_rules! test_for {
        ($($type:ty),+) => {{
            for &x in vals.iter() {
                $({
                    (x as $type).bin_write(&mut cursor).unwrap();
                })*
            }
            cursor.set_position(0);
            for &x in vals.iter() {
                $({
                let v = <$type>::bin_read(&mut cursor).unwrap();
                assert_eq!(v, x as $type);
                })*
            }
        }}
    }
    test_for!(u64, u32, u16, u8, i64, i32, i16, i8, usize)
}

impl BinaryWrite for str {
    fn bin_write<F: Write>(&self, f: &mut F) -> io::Result<()> {
        self.len().bin_write(f)?; // write a length prefix
        f.write_all(self.as_bytes()) // then dump all the content
    }
}
impl BinaryWrite for String {
    fn bin_write<F: Write>(&self, f: &mut F) -> io::Result<()> {
        self.as_str().bin_write(f)
    }
}
impl BinaryRead for String {
    fn bin_read<F: Read>(f: &mut F) -> io::Result<String> {
        let len = usize::bin_read(f)?; // read the length prefix
        let mut res = Vec::with_capacity(cmp::min(len, 1024 * 1024)); // allocate at most 1MB (in case of corrupted data)
        let mut buf = vec![0; cmp::min(len, 1024)]; // read blocks of 1KB at a time
        let buf_len = buf.len();
        while res.len() < len {
            let count = f.read(&mut buf[0..cmp::min(len - res.len(), buf_len)])?;
            if count == 0 {
                return Err(io::ErrorKind::UnexpectedEof.into());
            }
            res.extend_from_slice(&buf[0..count]);
        }
        match String::from_utf8(res) {
            Ok(s) => Ok(s),
            Err(_) => Err(io::ErrorKind::InvalidData.into()),
        }
    }
}

impl<T: BinaryWrite> BinaryWrite for [T] {
    fn bin_write<F: Write>(&self, f: &mut F) -> io::Result<()> {
        self.len().bin_write(f)?; // write a length prefix
        for item in self.iter() {
            item.bin_write(f)?; // then dump all the content
        }
        Ok(())
    }
}
impl<T: BinaryWrite> BinaryWrite for Vec<T> {
    fn bin_write<F: Write>(&self, f: &mut F) -> io::Result<()> {
        self.as_slice().bin_write(f)
    }
}
impl<T: BinaryRead> BinaryRead for Vec<T> {
    fn bin_read<F: Read>(f: &mut F) -> io::Result<Vec<T>> {
        let len = usize::bin_read(f)?; // read the length prefix
        let mut res = Vec::with_capacity(cmp::min(len, 1024 * 1024 / mem::size_of::<T>().max(1))); // allocate some space (not all, in case of corrupted data)
        for _ in 0..len {
            res.push(T::bin_read(f)?); // read exactly len items
        }
        Ok(res)
    }
}

#[test]
fn test_serialize_string() {
    let mut cursor = Cursor::new(Vec::new());
    "".bin_write(&mut cursor).unwrap();
    "mergesort".bin_write(&mut cursor).unwrap();
    cursor.set_position(0);
    assert_eq!(String::bin_read(&mut cursor).unwrap(), "");
    assert_eq!(String::bin_read(&mut cursor).unwrap(), "mergesort");
}
#[test]
fn test_serialize_truncated_string() {
    let mut cursor = Cursor::new(Vec::new());
    "some long enough content".bin_write(&mut cursor).unwrap();
    let full = cursor.into_inner();
    let mut partial = Cursor::new(&full[..full.len() - 4]);
    match String::bin_read(&mut partial) {
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => (),
        x => panic!("didn't fail: {:?}", x),
    }
}
#[test]
fn test_serialize_vec() {
    let vals: Vec<i64> = vec![0, -1, i64::MIN, i64::MAX, 0x0123456789abcdef];
    let mut cursor = Cursor::new(Vec::new());
    vals.bin_write(&mut cursor).unwrap();
    cursor.set_position(0);
    assert_eq!(Vec::<i64>::bin_read(&mut cursor).unwrap(), vals);
}
