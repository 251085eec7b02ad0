// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The CAVLC implementation of the entropy capability: plain Exp-Golomb reads
//! over the bit cursor plus the transform-coefficient decoding process of
//! clause 9.2.

use log::trace;

use crate::codec::h264::entropy::CavlcTables;
use crate::codec::h264::entropy::EntropyRead;
use crate::codec::h264::entropy::ResidualBlock;
use crate::codec::h264::entropy::SyntaxElement;
use crate::codec::h264::entropy::SyntaxError;
use crate::codec::h264::nalu_reader::NaluReader;

/// Table 9-4, ChromaArrayType 1 and 2: codeNum → coded_block_pattern for
/// (intra, inter) macroblock prediction modes.
const ME_CODED_BLOCK_PATTERN: [(u8, u8); 48] = [
    (47, 0),
    (31, 16),
    (15, 1),
    (0, 2),
    (23, 4),
    (27, 8),
    (29, 32),
    (30, 3),
    (7, 5),
    (11, 10),
    (13, 12),
    (14, 15),
    (39, 47),
    (43, 7),
    (45, 11),
    (46, 13),
    (16, 14),
    (3, 6),
    (5, 9),
    (10, 31),
    (12, 35),
    (19, 37),
    (21, 42),
    (26, 44),
    (28, 33),
    (35, 34),
    (37, 36),
    (42, 40),
    (44, 39),
    (1, 43),
    (2, 45),
    (4, 46),
    (8, 17),
    (17, 18),
    (18, 20),
    (20, 24),
    (24, 19),
    (6, 21),
    (9, 26),
    (22, 28),
    (25, 23),
    (32, 27),
    (33, 29),
    (34, 30),
    (36, 22),
    (40, 25),
    (38, 38),
    (41, 41),
];

/// Table 9-4, ChromaArrayType 0 and 3.
const ME_CODED_BLOCK_PATTERN_MONO: [(u8, u8); 16] = [
    (15, 0),
    (0, 1),
    (7, 2),
    (11, 4),
    (13, 8),
    (14, 3),
    (3, 5),
    (5, 10),
    (8, 12),
    (9, 15),
    (10, 7),
    (12, 11),
    (1, 13),
    (2, 14),
    (4, 6),
    (6, 9),
];

/// level_prefix values beyond this cannot occur in a conforming stream and
/// would overflow the level rescaling shift.
const MAX_LEVEL_PREFIX: u32 = 30;

/// The CAVLC entropy reader: fixed-width and Exp-Golomb reads straight off
/// the bit cursor, coefficient blocks through the clause 9.2 process with the
/// VLC tables supplied by `T`.
pub struct CavlcEntropy<'a, T: CavlcTables> {
    reader: NaluReader<'a>,
    tables: T,
}

impl<'a, T: CavlcTables> CavlcEntropy<'a, T> {
    pub fn new(reader: NaluReader<'a>, tables: T) -> Self {
        Self { reader, tables }
    }

    /// Classifies a failed cursor read: an empty cursor is truncation,
    /// anything else is a code with no legal interpretation.
    fn stream_error(&self, elem: SyntaxElement) -> SyntaxError {
        if self.reader.num_bits_left() == 0 {
            SyntaxError::UnexpectedEndOfData(elem)
        } else {
            SyntaxError::malformed(elem, "invalid code")
        }
    }

    /// level_prefix, clause 9.2.2.1: the number of leading zero bits before
    /// a one bit.
    fn read_level_prefix(&mut self) -> Result<u32, SyntaxError> {
        let mut leading_zero_bits = 0;
        loop {
            let bit = self
                .reader
                .read_bit()
                .map_err(|_| SyntaxError::UnexpectedEndOfData(SyntaxElement::LevelPrefix))?;
            if bit {
                return Ok(leading_zero_bits);
            }
            leading_zero_bits += 1;
            if leading_zero_bits > MAX_LEVEL_PREFIX {
                return Err(SyntaxError::malformed(
                    SyntaxElement::LevelPrefix,
                    format!("more than {} leading zero bits", MAX_LEVEL_PREFIX),
                ));
            }
        }
    }

    /// One coefficient level, clause 9.2.2. `first_non_t1` is set for the
    /// first coefficient after the trailing ones.
    fn read_level(
        &mut self,
        suffix_length: &mut u32,
        first_non_t1: bool,
        trailing_ones: u8,
    ) -> Result<i32, SyntaxError> {
        let level_prefix = self.read_level_prefix()?;
        let mut level_code = (level_prefix.min(15) << *suffix_length) as i32;

        if *suffix_length > 0 || level_prefix >= 14 {
            let level_suffix_size = if level_prefix >= 15 {
                level_prefix - 3
            } else if level_prefix == 14 && *suffix_length == 0 {
                4
            } else {
                *suffix_length
            };
            let level_suffix: u32 = self
                .reader
                .read_bits(level_suffix_size as usize)
                .map_err(|_| SyntaxError::UnexpectedEndOfData(SyntaxElement::LevelSuffix))?;
            level_code += level_suffix as i32;
        }
        if level_prefix >= 15 && *suffix_length == 0 {
            level_code += 15;
        }
        if level_prefix >= 16 {
            level_code += (1 << (level_prefix - 3)) - 4096;
        }
        if first_non_t1 && trailing_ones < 3 {
            level_code += 2;
        }

        let level = if level_code % 2 == 0 {
            (level_code + 2) >> 1
        } else {
            -((level_code + 1) >> 1)
        };

        if *suffix_length == 0 {
            *suffix_length = 1;
        }
        if level.unsigned_abs() > (3u32 << (*suffix_length - 1)) && *suffix_length < 6 {
            *suffix_length += 1;
        }

        Ok(level)
    }
}

impl<T: CavlcTables> EntropyRead for CavlcEntropy<'_, T> {
    const CABAC: bool = false;

    fn begin_slice_data(&mut self) -> Result<(), SyntaxError> {
        // CAVLC slice data starts unaligned, right after the slice header.
        Ok(())
    }

    fn align_to_byte(&mut self) -> Result<(), SyntaxError> {
        self.reader
            .skip_to_byte_alignment()
            .map_err(|_| SyntaxError::UnexpectedEndOfData(SyntaxElement::PcmAlignmentZeroBit))
    }

    fn read_pcm_byte(&mut self, elem: SyntaxElement) -> Result<u8, SyntaxError> {
        self.reader
            .read_bits(8)
            .map_err(|_| SyntaxError::UnexpectedEndOfData(elem))
    }

    fn resume_after_pcm(&mut self) -> Result<(), SyntaxError> {
        Ok(())
    }

    fn read_flag(&mut self, elem: SyntaxElement) -> Result<bool, SyntaxError> {
        self.reader.read_bit().map_err(|_| self.stream_error(elem))
    }

    fn read_bits(&mut self, elem: SyntaxElement, num_bits: usize) -> Result<u32, SyntaxError> {
        self.reader
            .read_bits(num_bits)
            .map_err(|_| self.stream_error(elem))
    }

    fn read_ue(&mut self, elem: SyntaxElement) -> Result<u32, SyntaxError> {
        self.reader.read_ue().map_err(|_| self.stream_error(elem))
    }

    fn read_se(&mut self, elem: SyntaxElement) -> Result<i32, SyntaxError> {
        self.reader.read_se().map_err(|_| self.stream_error(elem))
    }

    fn read_te(&mut self, elem: SyntaxElement, max: u32) -> Result<u32, SyntaxError> {
        self.reader
            .read_te(max)
            .map_err(|_| self.stream_error(elem))
    }

    fn read_me(
        &mut self,
        elem: SyntaxElement,
        intra: bool,
        chroma_array_type: u8,
    ) -> Result<u32, SyntaxError> {
        let code: u32 = self.reader.read_ue().map_err(|_| self.stream_error(elem))?;
        let table: &[(u8, u8)] = if matches!(chroma_array_type, 1 | 2) {
            &ME_CODED_BLOCK_PATTERN
        } else {
            &ME_CODED_BLOCK_PATTERN_MONO
        };
        let entry = table.get(code as usize).ok_or_else(|| {
            SyntaxError::malformed(elem, format!("code {} has no Table 9-4 entry", code))
        })?;
        Ok(u32::from(if intra { entry.0 } else { entry.1 }))
    }

    fn read_residual_block(
        &mut self,
        coeff: &mut [i32],
        blk: ResidualBlock,
    ) -> Result<(), SyntaxError> {
        let max_num_coeff = coeff.len();
        coeff.fill(0);

        let (total_coeff, trailing_ones) =
            self.tables
                .read_coeff_token(&mut self.reader, blk, max_num_coeff)?;
        trace!(
            "residual block {:?}: TotalCoeff={} TrailingOnes={}",
            blk,
            total_coeff,
            trailing_ones
        );
        if total_coeff == 0 {
            return Ok(());
        }
        if usize::from(total_coeff) > max_num_coeff.min(16) || trailing_ones > total_coeff.min(3) {
            return Err(SyntaxError::malformed(
                SyntaxElement::CoeffToken,
                format!(
                    "TotalCoeff {} / TrailingOnes {} illegal for a {}-coefficient block",
                    total_coeff, trailing_ones, max_num_coeff
                ),
            ));
        }

        let total_coeff = usize::from(total_coeff);
        let mut suffix_length = if total_coeff > 10 && trailing_ones < 3 {
            1
        } else {
            0
        };

        // Levels come highest-frequency first: the trailing ±1s, then the
        // explicitly coded levels.
        let mut level = [0i32; 16];
        for (i, level) in level.iter_mut().take(total_coeff).enumerate() {
            if i < usize::from(trailing_ones) {
                let sign = self.reader.read_bit().map_err(|_| {
                    SyntaxError::UnexpectedEndOfData(SyntaxElement::TrailingOnesSignFlag)
                })?;
                *level = 1 - 2 * i32::from(sign);
            } else {
                *level = self.read_level(
                    &mut suffix_length,
                    i == usize::from(trailing_ones),
                    trailing_ones,
                )?;
            }
        }

        let mut zeros_left = if total_coeff < max_num_coeff {
            let total_zeros =
                self.tables
                    .read_total_zeros(&mut self.reader, total_coeff as u8, max_num_coeff)?;
            if total_zeros as usize > max_num_coeff - total_coeff {
                return Err(SyntaxError::malformed(
                    SyntaxElement::TotalZeros,
                    format!(
                        "{} zeros do not fit {} coefficients in a {}-coefficient block",
                        total_zeros, total_coeff, max_num_coeff
                    ),
                ));
            }
            total_zeros
        } else {
            0
        };

        let mut run = [0u32; 16];
        for run in run.iter_mut().take(total_coeff - 1) {
            if zeros_left > 0 {
                let run_before = self.tables.read_run_before(&mut self.reader, zeros_left)?;
                if run_before > zeros_left {
                    return Err(SyntaxError::malformed(
                        SyntaxElement::RunBefore,
                        format!("run {} exceeds the {} zeros left", run_before, zeros_left),
                    ));
                }
                *run = run_before;
            }
            zeros_left -= *run;
        }
        // The lowest-frequency coefficient absorbs the remaining zeros.
        run[total_coeff - 1] = zeros_left;

        let mut coeff_num: isize = -1;
        for i in (0..total_coeff).rev() {
            coeff_num += run[i] as isize + 1;
            coeff[coeff_num as usize] = level[i];
        }

        Ok(())
    }

    fn more_slice_data(&mut self) -> Result<bool, SyntaxError> {
        Ok(self.reader.has_more_rbsp_data())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::Cell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;

    /// Scripted VLC tables: hands out pre-recorded symbol values and counts
    /// how often the coefficient-token table was consulted.
    #[derive(Default)]
    pub(crate) struct ScriptedTables {
        pub coeff_tokens: VecDeque<(u8, u8)>,
        pub total_zeros: VecDeque<u32>,
        pub run_before: VecDeque<u32>,
        pub coeff_token_reads: Rc<Cell<usize>>,
    }

    impl CavlcTables for ScriptedTables {
        fn read_coeff_token(
            &mut self,
            _reader: &mut NaluReader<'_>,
            _blk: ResidualBlock,
            _max_num_coeff: usize,
        ) -> Result<(u8, u8), SyntaxError> {
            self.coeff_token_reads.set(self.coeff_token_reads.get() + 1);
            self.coeff_tokens
                .pop_front()
                .ok_or(SyntaxError::UnexpectedEndOfData(SyntaxElement::CoeffToken))
        }

        fn read_total_zeros(
            &mut self,
            _reader: &mut NaluReader<'_>,
            _total_coeff: u8,
            _max_num_coeff: usize,
        ) -> Result<u32, SyntaxError> {
            self.total_zeros
                .pop_front()
                .ok_or(SyntaxError::UnexpectedEndOfData(SyntaxElement::TotalZeros))
        }

        fn read_run_before(
            &mut self,
            _reader: &mut NaluReader<'_>,
            _zeros_left: u32,
        ) -> Result<u32, SyntaxError> {
            self.run_before
                .pop_front()
                .ok_or(SyntaxError::UnexpectedEndOfData(SyntaxElement::RunBefore))
        }
    }

    fn entropy<'a>(data: &'a [u8], tables: ScriptedTables) -> CavlcEntropy<'a, ScriptedTables> {
        CavlcEntropy::new(NaluReader::new(data), tables)
    }

    #[test]
    fn empty_block_stays_zero() {
        for max_num_coeff in [4, 15, 16] {
            let tables = ScriptedTables {
                coeff_tokens: VecDeque::from([(0, 0)]),
                ..Default::default()
            };
            let mut cavlc = entropy(&[0xff], tables);

            let mut coeff = [1i32; 16];
            cavlc
                .read_residual_block(
                    &mut coeff[..max_num_coeff],
                    ResidualBlock::LumaLevel { blk_idx: 0 },
                )
                .unwrap();
            assert_eq!(&coeff[..max_num_coeff], &vec![0; max_num_coeff][..]);
        }
    }

    #[test]
    fn run_level_scatter() {
        // TotalCoeff 3, TrailingOnes 1; levels decode to [-1, 3, -2] and the
        // runs to [0, 1, 2] with total_zeros 3. The bits carry the trailing
        // sign (1), level_prefix 2 (001), then level_prefix 1 plus a one-bit
        // suffix (011).
        let tables = ScriptedTables {
            coeff_tokens: VecDeque::from([(3, 1)]),
            total_zeros: VecDeque::from([3]),
            run_before: VecDeque::from([0, 1]),
            ..Default::default()
        };
        let mut cavlc = entropy(&[0b1001_0110, 0x00], tables);

        let mut coeff = [0i32; 16];
        cavlc
            .read_residual_block(&mut coeff, ResidualBlock::LumaLevel { blk_idx: 0 })
            .unwrap();

        let mut expected = [0i32; 16];
        expected[2] = -2;
        expected[4] = 3;
        expected[5] = -1;
        assert_eq!(coeff, expected);
    }

    #[test]
    fn level_prefix_14_reads_four_suffix_bits() {
        // A lone coefficient: level_prefix 14 with suffixLength 0 carries a
        // 4-bit suffix. levelCode = 14 + 5 + 2 = 21, i.e. level -11.
        let tables = ScriptedTables {
            coeff_tokens: VecDeque::from([(1, 0)]),
            total_zeros: VecDeque::from([0]),
            ..Default::default()
        };
        let mut cavlc = entropy(&[0x00, 0x02, 0xa0], tables);

        let mut coeff = [0i32; 16];
        cavlc
            .read_residual_block(&mut coeff, ResidualBlock::LumaLevel { blk_idx: 0 })
            .unwrap();
        assert_eq!(coeff[0], -11);
        assert_eq!(&coeff[1..], &[0; 15]);
    }

    #[test]
    fn suffix_length_adaptation_is_monotonic_and_capped() {
        // Each level is coded with level_prefix 7 and an all-zero suffix of
        // the current adaptive width, large enough to push the width up one
        // step per level until it pins at 6.
        let mut bits: Vec<u8> = Vec::new();
        for suffix_width in [1usize, 2, 3, 4, 5, 6, 6] {
            bits.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]);
            bits.extend(std::iter::repeat(0).take(suffix_width));
        }
        let mut data = vec![0u8; bits.len().div_ceil(8)];
        for (i, bit) in bits.iter().enumerate() {
            data[i / 8] |= bit << (7 - i % 8);
        }

        let mut cavlc = entropy(&data, ScriptedTables::default());
        let mut suffix_length = 1u32;
        let mut prev = suffix_length;
        for _ in 0..7 {
            cavlc.read_level(&mut suffix_length, false, 3).unwrap();
            assert!(suffix_length >= prev);
            assert!(suffix_length <= 6);
            prev = suffix_length;
        }
        assert_eq!(suffix_length, 6);
    }

    #[test]
    fn oversized_total_coeff_is_rejected() {
        let tables = ScriptedTables {
            coeff_tokens: VecDeque::from([(5, 0)]),
            ..Default::default()
        };
        let mut cavlc = entropy(&[0xff], tables);

        let mut coeff = [0i32; 4];
        let err = cavlc
            .read_residual_block(&mut coeff, ResidualBlock::ChromaDcLevel { plane: 0 })
            .unwrap_err();
        assert!(matches!(err, SyntaxError::MalformedSyntax { .. }));
    }

    #[test]
    fn mapped_exp_golomb_follows_table_9_4() {
        // codeNum 0: ue bits "1".
        let tables = ScriptedTables::default();
        let mut cavlc = entropy(&[0b1000_0000], tables);
        assert_eq!(
            cavlc
                .read_me(SyntaxElement::CodedBlockPattern, true, 1)
                .unwrap(),
            47
        );

        let tables = ScriptedTables::default();
        let mut cavlc = entropy(&[0b1000_0000], tables);
        assert_eq!(
            cavlc
                .read_me(SyntaxElement::CodedBlockPattern, false, 1)
                .unwrap(),
            0
        );

        // codeNum 2: ue bits "011".
        let tables = ScriptedTables::default();
        let mut cavlc = entropy(&[0b0110_0000], tables);
        assert_eq!(
            cavlc
                .read_me(SyntaxElement::CodedBlockPattern, true, 0)
                .unwrap(),
            7
        );

        // codeNum 16 is out of range for ChromaArrayType 0.
        let tables = ScriptedTables::default();
        let mut cavlc = entropy(&[0b0000_1000, 0b1000_0000], tables);
        assert!(cavlc
            .read_me(SyntaxElement::CodedBlockPattern, true, 0)
            .is_err());
    }
}
