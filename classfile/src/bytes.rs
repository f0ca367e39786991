//! Big endian primitives for reading from and writing to byte buffers.

use crate::ClassFileError;

pub(crate) trait ClassRead<'a> {
	/// The absolute offset of the next byte, used in error messages.
	fn marker(&self) -> usize;
	fn remaining(&self) -> usize;

	fn read_slice(&mut self, n: usize) -> Result<&'a [u8], ClassFileError>;

	fn read_n<const N: usize>(&mut self) -> Result<[u8; N], ClassFileError> {
		let slice = self.read_slice(N)?;
		let mut buf = [0u8; N];
		buf.copy_from_slice(slice);
		Ok(buf)
	}
	fn read_u8(&mut self) -> Result<u8, ClassFileError> {
		Ok(u8::from_be_bytes(self.read_n()?))
	}
	fn read_u16(&mut self) -> Result<u16, ClassFileError> {
		Ok(u16::from_be_bytes(self.read_n()?))
	}
	fn read_u32(&mut self) -> Result<u32, ClassFileError> {
		Ok(u32::from_be_bytes(self.read_n()?))
	}
	fn read_u64(&mut self) -> Result<u64, ClassFileError> {
		Ok(u64::from_be_bytes(self.read_n()?))
	}
	fn read_i8(&mut self) -> Result<i8, ClassFileError> {
		Ok(i8::from_be_bytes(self.read_n()?))
	}
	fn read_i16(&mut self) -> Result<i16, ClassFileError> {
		Ok(i16::from_be_bytes(self.read_n()?))
	}
	fn read_i32(&mut self) -> Result<i32, ClassFileError> {
		Ok(i32::from_be_bytes(self.read_n()?))
	}
	fn read_i64(&mut self) -> Result<i64, ClassFileError> {
		Ok(i64::from_be_bytes(self.read_n()?))
	}

	fn read_u16_as_usize(&mut self) -> Result<usize, ClassFileError> {
		Ok(self.read_u16()? as usize)
	}
	fn read_u32_as_usize(&mut self) -> Result<usize, ClassFileError> {
		Ok(self.read_u32()? as usize)
	}

	fn read_vec<T, S, E>(&mut self, get_size: S, mut get_element: E) -> Result<Vec<T>, ClassFileError>
		where
			S: FnOnce(&mut Self) -> Result<usize, ClassFileError>,
			E: FnMut(&mut Self) -> Result<T, ClassFileError>
	{
		let size = get_size(self)?;
		let mut vec = Vec::with_capacity(size.min(self.remaining()));
		for _ in 0..size {
			vec.push(get_element(self)?);
		}
		Ok(vec)
	}
}

/// A cursor over a borrowed byte slice.
///
/// Sub-readers created with [`ByteReader::sub_reader`] keep reporting offsets relative to the
/// start of the whole class file.
#[derive(Debug, Clone)]
pub(crate) struct ByteReader<'a> {
	data: &'a [u8],
	pos: usize,
	base: usize,
}

impl<'a> ByteReader<'a> {
	pub(crate) fn new(data: &'a [u8]) -> ByteReader<'a> {
		ByteReader { data, pos: 0, base: 0 }
	}

	/// Takes the next `n` bytes as a new reader.
	pub(crate) fn sub_reader(&mut self, n: usize) -> Result<ByteReader<'a>, ClassFileError> {
		let base = self.marker();
		let data = self.read_slice(n)?;
		Ok(ByteReader { data, pos: 0, base })
	}

	/// Position relative to the start of this reader.
	pub(crate) fn position(&self) -> usize {
		self.pos
	}

	pub(crate) fn is_empty(&self) -> bool {
		self.pos == self.data.len()
	}

	/// The bytes not read yet, without consuming them.
	pub(crate) fn rest(&self) -> &'a [u8] {
		&self.data[self.pos..]
	}
}

impl<'a> ClassRead<'a> for ByteReader<'a> {
	fn marker(&self) -> usize {
		self.base + self.pos
	}
	fn remaining(&self) -> usize {
		self.data.len() - self.pos
	}

	fn read_slice(&mut self, n: usize) -> Result<&'a [u8], ClassFileError> {
		let end = self.pos.checked_add(n)
			.filter(|end| *end <= self.data.len())
			.ok_or(ClassFileError::TruncatedInput {
				offset: self.marker(),
				needed: n,
				available: self.remaining(),
			})?;
		let slice = &self.data[self.pos..end];
		self.pos = end;
		Ok(slice)
	}
}

pub(crate) trait ClassWrite {
	fn write_u8_slice(&mut self, buf: &[u8]);

	fn write_u8(&mut self, value: u8) {
		self.write_u8_slice(&[value])
	}
	fn write_u16(&mut self, value: u16) {
		self.write_u8_slice(&value.to_be_bytes())
	}
	fn write_u32(&mut self, value: u32) {
		self.write_u8_slice(&value.to_be_bytes())
	}
	fn write_u64(&mut self, value: u64) {
		self.write_u8_slice(&value.to_be_bytes())
	}
	fn write_i8(&mut self, value: i8) {
		self.write_u8_slice(&value.to_be_bytes())
	}
	fn write_i16(&mut self, value: i16) {
		self.write_u8_slice(&value.to_be_bytes())
	}
	fn write_i32(&mut self, value: i32) {
		self.write_u8_slice(&value.to_be_bytes())
	}
	fn write_i64(&mut self, value: i64) {
		self.write_u8_slice(&value.to_be_bytes())
	}

	fn write_usize_as_u16(&mut self, value: usize) -> Result<(), ClassFileError> {
		let value = u16::try_from(value)
			.map_err(|_| ClassFileError::Encoding(format!("failed to convert {value} to u16 for writing: value too large")))?;
		self.write_u16(value);
		Ok(())
	}
	fn write_usize_as_u32(&mut self, value: usize) -> Result<(), ClassFileError> {
		let value = u32::try_from(value)
			.map_err(|_| ClassFileError::Encoding(format!("failed to convert {value} to u32 for writing: value too large")))?;
		self.write_u32(value);
		Ok(())
	}

	/// Writes a `u16` length followed by each element.
	fn write_slice<T>(
		&mut self,
		slice: &[T],
		mut put_element: impl FnMut(&mut Self, &T) -> Result<(), ClassFileError>,
	) -> Result<(), ClassFileError> {
		self.write_usize_as_u16(slice.len())?;
		for value in slice {
			put_element(self, value)?;
		}
		Ok(())
	}
}

impl ClassWrite for Vec<u8> {
	fn write_u8_slice(&mut self, buf: &[u8]) {
		self.extend_from_slice(buf)
	}
}

/// Patches a big endian `i16` at `pos`, for branch offsets known only after the target is written.
pub(crate) fn put_i16_at(vec: &mut [u8], pos: usize, value: i16) {
	let [a, b] = value.to_be_bytes();
	vec[pos] = a;
	vec[pos + 1] = b;
}

pub(crate) fn put_i32_at(vec: &mut [u8], pos: usize, value: i32) {
	let [a, b, c, d] = value.to_be_bytes();
	vec[pos] = a;
	vec[pos + 1] = b;
	vec[pos + 2] = c;
	vec[pos + 3] = d;
}
