/// Running one's-complement sum over 16-bit big-endian words.
///
/// Bytes may be fed in pieces; an odd byte left over from one call is paired
/// with the first byte of the next, so the result is the same as summing the
/// concatenation.
#[derive(Debug, Clone, Default)]
pub struct Checksum {
    sum: u32,
    pending: Option<u8>, // High byte of a word still waiting for its low byte
}

impl Checksum {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_u16(&mut self, word: u16) -> &mut Self {
        self.add_bytes(&word.to_be_bytes())
    }

    pub fn add_bytes(&mut self, data: &[u8]) -> &mut Self {
        let mut data = data;

        if let Some(high) = self.pending.take() {
            match data.split_first() {
                Some((&low, rest)) => {
                    self.add_word(u16::from_be_bytes([high, low]));
                    data = rest;
                }
                None => {
                    self.pending = Some(high);
                    return self;
                }
            }
        }

        let mut chunks = data.chunks_exact(2);
        for chunk in &mut chunks {
            self.add_word(u16::from_be_bytes([chunk[0], chunk[1]]));
        }
        if let [last] = chunks.remainder() {
            self.pending = Some(*last);
        }
        self
    }

    /// Fold the carries and complement. A trailing odd byte is zero-padded.
    pub fn finish(&self) -> u16 {
        let mut sum = self.sum;
        if let Some(high) = self.pending {
            sum += (high as u32) << 8;
        }
        while sum >> 16 != 0 {
            sum = fold_once(sum);
        }
        !(sum as u16)
    }

    fn add_word(&mut self, word: u16) {
        // Fold on every add so the accumulator never overflows
        self.sum = fold_once(self.sum + word as u32);
    }
}

fn fold_once(sum: u32) -> u32 {
    (sum & 0xffff) + (sum >> 16)
}

/// Compute the Internet checksum of `data` in one go.
pub fn checksum(data: &[u8]) -> u16 {
    Checksum::new().add_bytes(data).finish()
}

// -- Unit tests --
