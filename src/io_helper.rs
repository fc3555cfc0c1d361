use crate::Error;
use memmap::Mmap;
use std::io::{self, Write};
use std::ops::Deref;
use std::sync::Arc;
use std::{cmp::Ordering, convert::TryInto, fmt, str};

/// Read-only bytes shared between readers; either a mapped file or heap data.
#[derive(Clone)]
pub enum SharedBytes {
    Mapped(Arc<Mmap>),
    Heap(Arc<Vec<u8>>),
}

impl Deref for SharedBytes {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match self {
            SharedBytes::Mapped(m) => &m[..],
            SharedBytes::Heap(v) => &v[..],
        }
    }
}

impl fmt::Debug for SharedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedBytes[{}]", self.len())
    }
}

#[derive(Hash, Eq, PartialEq, Clone)]
pub struct Bytes {
    pub data: Box<[u8]>,
}
impl Bytes {
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
    pub fn from_slice(input: &[u8]) -> Self {
        let mut tmp = Vec::new();
        tmp.reserve_exact(input.len());
        tmp.extend_from_slice(input);
        Self {
            data: tmp.into_boxed_slice(),
        }
    }
    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_ref()
    }
    /// Compare to another byte slice somewhere else.
    pub fn cmp_slice(&self, rhs: &[u8]) -> Ordering {
        self.data.as_ref().cmp(rhs)
    }
}
impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Ok(readable) = str::from_utf8(&self.data) {
            write!(f, "{}", readable)
        } else {
            write!(f, "{:?}", &self.data)
        }
    }
}

pub trait InputStream {
    fn tell(&self) -> usize;
    fn eof(&self) -> bool;
    fn advance(&mut self, n: usize) -> Result<&[u8], Error>;
    fn get(&mut self) -> Result<u8, Error>;
}

pub trait DataInputStream {
    fn read_vbyte(&mut self) -> Result<u64, Error>;
    fn read_signed_vbyte(&mut self) -> Result<i64, Error>;
    fn read_u64(&mut self) -> Result<u64, Error>;
    fn read_u32(&mut self) -> Result<u32, Error>;
    fn read_u16(&mut self) -> Result<u16, Error>;
    fn read_ordered_f64(&mut self) -> Result<f64, Error>;
    fn read_len_prefixed(&mut self) -> Result<Vec<u8>, Error>;
}

impl<I> DataInputStream for I
where
    I: InputStream,
{
    /// 7-bit groups, least-significant first; highest-bit set means stop.
    fn read_vbyte(&mut self) -> Result<u64, Error> {
        let mut result: u64 = 0;
        let mut bit_p: u8 = 0;
        while !self.eof() {
            let byte = self.get()? as u64;
            if byte & 0x80 > 0 {
                result |= (byte & 0x7f) << bit_p;
                return Ok(result);
            }
            result |= byte << bit_p;
            bit_p += 7;
        }
        Err(Error::InternalSizeErr)
    }
    /// Zig-zag folded over the unsigned form.
    fn read_signed_vbyte(&mut self) -> Result<i64, Error> {
        let raw = self.read_vbyte()?;
        Ok(((raw >> 1) as i64) ^ -((raw & 1) as i64))
    }
    fn read_u64(&mut self) -> Result<u64, Error> {
        let exact = self.advance(8)?;
        Ok(u64::from_be_bytes(exact.try_into().unwrap()))
    }
    fn read_u32(&mut self) -> Result<u32, Error> {
        let exact = self.advance(4)?;
        Ok(u32::from_be_bytes(exact.try_into().unwrap()))
    }
    fn read_u16(&mut self) -> Result<u16, Error> {
        let exact = self.advance(2)?;
        Ok(u16::from_be_bytes(exact.try_into().unwrap()))
    }
    fn read_ordered_f64(&mut self) -> Result<f64, Error> {
        Ok(ordered_to_f64(self.read_u64()?))
    }
    fn read_len_prefixed(&mut self) -> Result<Vec<u8>, Error> {
        let n = self.read_vbyte()? as usize;
        Ok(self.advance(n)?.to_vec())
    }
}

// Zero-Copy InputStream
#[derive(Clone)]
pub struct SliceInputStream<'src> {
    data: &'src [u8],
    /// This supports rewinding and "telling" how far we've read.
    position: usize,
}

impl fmt::Debug for SliceInputStream<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SliceInputStream[@{}..{}]",
            self.position,
            self.data.len()
        )
    }
}

impl<'src> InputStream for SliceInputStream<'src> {
    fn tell(&self) -> usize {
        self.position
    }
    fn eof(&self) -> bool {
        self.position >= self.data.len()
    }
    fn advance(&mut self, n: usize) -> Result<&[u8], Error> {
        self.consume(n)
    }
    fn get(&mut self) -> Result<u8, Error> {
        if self.position >= self.data.len() {
            Err(Error::InternalSizeErr)
        } else {
            let result = Ok(self.data[self.position]);
            self.position += 1;
            result
        }
    }
}

impl<'src> SliceInputStream<'src> {
    pub fn new(data: &'src [u8]) -> Self {
        Self { data, position: 0 }
    }
    pub fn seek(&mut self, position: usize) -> Result<(), Error> {
        self.position = position;
        if self.position <= self.data.len() {
            Ok(())
        } else {
            Err(Error::InternalSizeErr)
        }
    }
    #[inline]
    pub fn consume(&mut self, n: usize) -> Result<&'src [u8], Error> {
        let end = self.position + n;
        if end > self.data.len() {
            return Err(Error::InternalSizeErr);
        }
        let found = &self.data[self.position..end];
        self.position = end;
        Ok(found)
    }
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }
}

/// Owning cousin of SliceInputStream; bounded to [start, end) of its source.
#[derive(Debug, Clone)]
pub struct SharedInputStream {
    source: SharedBytes,
    start: usize,
    end: usize,
    offset: usize,
}

impl SharedInputStream {
    pub fn new(source: SharedBytes, start: usize, end: usize) -> Self {
        Self {
            source,
            start,
            end,
            offset: 0,
        }
    }
}

impl InputStream for SharedInputStream {
    fn tell(&self) -> usize {
        self.offset
    }
    fn eof(&self) -> bool {
        self.offset + self.start >= self.end
    }
    fn advance(&mut self, n: usize) -> Result<&[u8], Error> {
        let lhs = self.start + self.offset;
        let rhs = lhs + n;
        self.offset += n;
        if rhs > self.end {
            return Err(Error::InternalSizeErr);
        }
        Ok(&self.source[lhs..rhs])
    }
    fn get(&mut self) -> Result<u8, Error> {
        if self.eof() {
            Err(Error::InternalSizeErr)
        } else {
            let b = self.source[self.start + self.offset];
            self.offset += 1;
            Ok(b)
        }
    }
}

pub fn write_vbyte<W>(i: u32, out: &mut W) -> io::Result<usize>
where
    W: io::Write,
{
    write_vbyte_u64(i as u64, out)
}

pub fn write_vbyte_u64<W>(i: u64, out: &mut W) -> io::Result<usize>
where
    W: io::Write,
{
    let mut buf = [0u8; 10];
    let mut n = 0;
    let mut i = i;
    loop {
        if i < 0x80 {
            buf[n] = (i as u8) | 0x80;
            n += 1;
            break;
        }
        buf[n] = (i & 0x7f) as u8;
        n += 1;
        i >>= 7;
    }
    out.write_all(&buf[..n])?;
    Ok(n)
}

pub fn write_signed_vbyte<W>(i: i64, out: &mut W) -> io::Result<usize>
where
    W: io::Write,
{
    let folded = ((i << 1) ^ (i >> 63)) as u64;
    write_vbyte_u64(folded, out)
}

pub fn write_len_prefixed<W>(data: &[u8], out: &mut W) -> io::Result<usize>
where
    W: io::Write,
{
    let n = write_vbyte(data.len() as u32, out)?;
    out.write_all(data)?;
    Ok(n + data.len())
}

/// Monotone bijection f64 -> u64: byte-lexicographic order equals numeric order.
/// Positives get the sign bit flipped; negatives get every bit flipped.
pub fn f64_to_ordered(x: f64) -> u64 {
    let bits = x.to_bits();
    if bits & (1 << 63) == 0 {
        bits ^ (1 << 63)
    } else {
        !bits
    }
}

pub fn ordered_to_f64(bits: u64) -> f64 {
    if bits & (1 << 63) != 0 {
        f64::from_bits(bits ^ (1 << 63))
    } else {
        f64::from_bits(!bits)
    }
}

/// Same trick for signed integers: flip the sign bit and order falls out.
pub fn i64_to_ordered(x: i64) -> u64 {
    (x as u64) ^ (1 << 63)
}

pub fn ordered_to_i64(bits: u64) -> i64 {
    (bits ^ (1 << 63)) as i64
}

pub fn write_ordered_f64<W>(x: f64, out: &mut W) -> io::Result<()>
where
    W: io::Write,
{
    out.write_all(&f64_to_ordered(x).to_be_bytes())
}

/// A writer that knows how far it has written; offsets become file pointers.
pub struct CountingWriter<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> CountingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }
    pub fn tell(&self) -> u64 {
        self.written
    }
    pub fn into_inner(self) -> W {
        self.inner
    }
    pub fn get_mut(&mut self) -> &mut W {
        &mut self.inner
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vbytes() {
        let expected: &[u64] = &[
            0,
            0xf,
            0xef,
            0xeef,
            0xbeef,
            0xdbeef,
            0xadbeef,
            0xeadbeef,
            0xdeadbeef,
            0xdeadbeefcafe,
            std::u64::MAX,
        ];
        let mut buf = Vec::new();
        for x in expected {
            write_vbyte_u64(*x, &mut buf).unwrap();
        }

        let mut rdr = SliceInputStream::new(&buf[0..]);
        for x in expected {
            assert_eq!(*x, rdr.read_vbyte().unwrap());
        }
        assert!(rdr.eof());
    }

    #[test]
    fn test_signed_vbytes() {
        let expected: &[i64] = &[0, -1, 1, -63, 64, -100_000, 100_000, std::i64::MIN];
        let mut buf = Vec::new();
        for x in expected {
            write_signed_vbyte(*x, &mut buf).unwrap();
        }
        let mut rdr = SliceInputStream::new(&buf[0..]);
        for x in expected {
            assert_eq!(*x, rdr.read_signed_vbyte().unwrap());
        }
        assert!(rdr.eof());
    }

    #[test]
    fn test_read_u32() {
        let expected = &[0x11, 0x22, 0x33, 0x44];
        let mut rdr = SliceInputStream::new(&expected[0..]);
        assert_eq!(0x11223344, rdr.read_u32().unwrap());
        assert!(rdr.eof());
    }

    #[test]
    fn test_len_prefixed() {
        let mut buf = Vec::new();
        write_len_prefixed(b"hello", &mut buf).unwrap();
        write_len_prefixed(b"", &mut buf).unwrap();
        let mut rdr = SliceInputStream::new(&buf);
        assert_eq!(b"hello".to_vec(), rdr.read_len_prefixed().unwrap());
        assert_eq!(Vec::<u8>::new(), rdr.read_len_prefixed().unwrap());
        assert!(rdr.eof());
    }

    #[test]
    fn ordered_floats_sort_like_numbers() {
        let mut xs: Vec<f64> = vec![
            -1e300, -2.5, -1.0, -0.5, -0.0, 0.0, 0.5, 1.0, 2.5, 3.14, 1e300,
        ];
        let mut encoded: Vec<[u8; 8]> = xs.iter().map(|x| f64_to_ordered(*x).to_be_bytes()).collect();
        xs.sort_by(|a, b| a.partial_cmp(b).unwrap());
        encoded.sort();
        let decoded: Vec<f64> = encoded
            .iter()
            .map(|b| ordered_to_f64(u64::from_be_bytes(*b)))
            .collect();
        assert_eq!(xs, decoded);
    }

    #[test]
    fn ordered_ints_sort_like_numbers() {
        let xs: Vec<i64> = vec![std::i64::MIN, -77, -1, 0, 1, 42, std::i64::MAX];
        for window in xs.windows(2) {
            assert!(i64_to_ordered(window[0]) < i64_to_ordered(window[1]));
            assert_eq!(window[0], ordered_to_i64(i64_to_ordered(window[0])));
        }
    }

    #[test]
    fn test_counting_writer() {
        let mut w = CountingWriter::new(Vec::new());
        write_vbyte(300, &mut w).unwrap();
        assert_eq!(2, w.tell());
        w.write_all(&[0u8; 7]).unwrap();
        assert_eq!(9, w.tell());
    }
}
