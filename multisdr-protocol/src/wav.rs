// SPDX-FileCopyrightText: 2026 Stan Grams <sjg@haxx.space>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Canonical 44-byte-header WAV writer/reader for MultiDecoder's
//! per-cycle recordings (§4.G.3, §6): PCM mono, 16-bit little-endian,
//! at whatever sample rate the session was opened with (12 kHz for the
//! digital-mode bands this system records).

use std::io::{self, Read, Seek, SeekFrom, Write};

pub const HEADER_LEN: u32 = 44;

/// Write-side WAV file: the header is written with placeholder sizes up
/// front, samples are appended as they arrive, and the header is patched
/// with final sizes on `finish()` — matching the "header finalized at
/// close" requirement.
pub struct WavWriter<W: Write + Seek> {
    inner: W,
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
    data_bytes_written: u32,
}

impl<W: Write + Seek> WavWriter<W> {
    pub fn new(mut inner: W, sample_rate: u32) -> io::Result<Self> {
        let channels = 1u16;
        let bits_per_sample = 16u16;
        write_header(&mut inner, sample_rate, channels, bits_per_sample, 0)?;
        Ok(Self {
            inner,
            sample_rate,
            channels,
            bits_per_sample,
            data_bytes_written: 0,
        })
    }

    /// Append mono 16-bit PCM samples (native endianness in memory,
    /// written little-endian per the canonical format).
    pub fn write_samples(&mut self, samples: &[i16]) -> io::Result<()> {
        for &s in samples {
            self.inner.write_all(&s.to_le_bytes())?;
        }
        self.data_bytes_written += (samples.len() * 2) as u32;
        Ok(())
    }

    /// Patch the RIFF/data chunk sizes now that the sample count is
    /// known, and return the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.seek(SeekFrom::Start(0))?;
        write_header(
            &mut self.inner,
            self.sample_rate,
            self.channels,
            self.bits_per_sample,
            self.data_bytes_written,
        )?;
        self.inner.seek(SeekFrom::End(0))?;
        Ok(self.inner)
    }
}

fn write_header<W: Write>(
    w: &mut W,
    sample_rate: u32,
    channels: u16,
    bits_per_sample: u16,
    data_bytes: u32,
) -> io::Result<()> {
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;
    let riff_size = 36 + data_bytes;

    w.write_all(b"RIFF")?;
    w.write_all(&riff_size.to_le_bytes())?;
    w.write_all(b"WAVE")?;
    w.write_all(b"fmt ")?;
    w.write_all(&16u32.to_le_bytes())?; // fmt chunk size
    w.write_all(&1u16.to_le_bytes())?; // PCM
    w.write_all(&channels.to_le_bytes())?;
    w.write_all(&sample_rate.to_le_bytes())?;
    w.write_all(&byte_rate.to_le_bytes())?;
    w.write_all(&block_align.to_le_bytes())?;
    w.write_all(&bits_per_sample.to_le_bytes())?;
    w.write_all(b"data")?;
    w.write_all(&data_bytes.to_le_bytes())?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct WavMeta {
    pub sample_rate: u32,
    pub channels: u16,
    pub bits_per_sample: u16,
}

#[derive(Debug, thiserror::Error)]
pub enum WavError {
    #[error("not a canonical RIFF/WAVE file")]
    BadMagic,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Read back a canonical WAV file written by `WavWriter`: the header
/// fields and the full sample buffer (R2 round-trip).
pub fn read_all<R: Read>(mut r: R) -> Result<(WavMeta, Vec<i16>), WavError> {
    let mut header = [0u8; HEADER_LEN as usize];
    r.read_exact(&mut header)?;

    if &header[0..4] != b"RIFF" || &header[8..12] != b"WAVE" || &header[12..16] != b"fmt " {
        return Err(WavError::BadMagic);
    }
    if &header[36..40] != b"data" {
        return Err(WavError::BadMagic);
    }

    let channels = u16::from_le_bytes([header[22], header[23]]);
    let sample_rate = u32::from_le_bytes([header[24], header[25], header[26], header[27]]);
    let bits_per_sample = u16::from_le_bytes([header[34], header[35]]);
    let data_bytes = u32::from_le_bytes([header[40], header[41], header[42], header[43]]);

    let mut raw = vec![0u8; data_bytes as usize];
    r.read_exact(&mut raw)?;
    let samples = raw
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();

    Ok((
        WavMeta {
            sample_rate,
            channels,
            bits_per_sample,
        },
        samples,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trip_preserves_samples_and_metadata() {
        let samples: Vec<i16> = (0..1000).map(|i| (i % 2000) as i16 - 1000).collect();

        let cursor = Cursor::new(Vec::new());
        let mut writer = WavWriter::new(cursor, 12_000).unwrap();
        writer.write_samples(&samples[..500]).unwrap();
        writer.write_samples(&samples[500..]).unwrap();
        let cursor = writer.finish().unwrap();

        let bytes = cursor.into_inner();
        assert_eq!(bytes.len() as u32, HEADER_LEN + samples.len() as u32 * 2);

        let (meta, read_back) = read_all(Cursor::new(bytes)).unwrap();
        assert_eq!(meta.sample_rate, 12_000);
        assert_eq!(meta.channels, 1);
        assert_eq!(meta.bits_per_sample, 16);
        assert_eq!(read_back, samples);
    }

    #[test]
    fn empty_recording_is_still_a_valid_header() {
        let cursor = Cursor::new(Vec::new());
        let writer = WavWriter::new(cursor, 12_000).unwrap();
        let bytes = writer.finish().unwrap().into_inner();
        assert_eq!(bytes.len() as u32, HEADER_LEN);
        let (_, samples) = read_all(Cursor::new(bytes)).unwrap();
        assert!(samples.is_empty());
    }
}
