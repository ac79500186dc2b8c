use byteorder::{ByteOrder, NativeEndian};

/// The 4-byte key that a client XORs over the payload of every frame it sends.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Mask([u8; 4]);

impl Mask {
    /// Draws a fresh random masking key.
    #[must_use]
    pub fn new() -> Self {
        rand::random::<[u8; 4]>().into()
    }

    /// Returns the key bytes in wire order.
    #[must_use]
    pub fn key(self) -> [u8; 4] {
        self.0
    }
}

impl Default for Mask {
    fn default() -> Self {
        Self::new()
    }
}

impl From<[u8; 4]> for Mask {
    fn from(key: [u8; 4]) -> Self {
        Mask(key)
    }
}

impl From<u32> for Mask {
    fn from(data: u32) -> Self {
        Mask(data.to_be_bytes())
    }
}

impl From<Mask> for [u8; 4] {
    fn from(mask: Mask) -> Self {
        mask.0
    }
}

fn mask_u8_in_place(data: &mut [u8], key: &[u8; 4], offset: usize) -> usize {
    for (i, b) in data.iter_mut().enumerate() {
        *b ^= key[(offset + i) & 3];
    }

    (offset + data.len()) & 3
}

fn mask_aligned_in_place(data: &mut [u32], mask: u32) {
    for n in data {
        *n ^= mask;
    }
}

/// Masks (or unmasks) `data` in place, where `data[0]` is the payload byte at position `offset`.
///
/// Payload byte `i` is XORed with key byte `i % 4`. Applying the same mask twice restores the
/// original bytes.
pub fn mask_slice_at(data: &mut [u8], mask: Mask, offset: usize) {
    let key = mask.0;

    // Safety: every bit pattern is a valid u32, and align_to_mut keeps the three slices disjoint.
    let (head, words, tail) = unsafe { data.align_to_mut::<u32>() };
    let offset = mask_u8_in_place(head, &key, offset);

    let rotated = [key[offset], key[(offset + 1) & 3], key[(offset + 2) & 3], key[(offset + 3) & 3]];
    mask_aligned_in_place(words, NativeEndian::read_u32(&rotated));

    mask_u8_in_place(tail, &key, offset);
}

/// Masks (or unmasks) a whole payload in place.
pub fn mask_slice(data: &mut [u8], mask: Mask) {
    mask_slice_at(data, mask, 0)
}

/// Copies `data` into `buf` and masks it.
pub fn mask_slice_copy(buf: &mut [u8], data: &[u8], mask: Mask) {
    buf.copy_from_slice(data);
    mask_slice(buf, mask)
}
