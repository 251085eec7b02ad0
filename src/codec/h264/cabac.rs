// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The CABAC implementation of the entropy capability. Every syntax element
//! is a context-coded symbol decoded by the arithmetic engine collaborator;
//! this module contributes the residual-block scan of clause 7.3.5.3.3 and
//! the raw (non-arithmetic) PCM and alignment handling.

use log::trace;

use crate::codec::h264::entropy::CabacEngine;
use crate::codec::h264::entropy::EntropyRead;
use crate::codec::h264::entropy::ResidualBlock;
use crate::codec::h264::entropy::SyntaxElement;
use crate::codec::h264::entropy::SyntaxError;
use crate::codec::h264::nalu_reader::NaluReader;

/// The CABAC entropy reader, wrapping the bit cursor and the arithmetic
/// decoding engine supplied by `E`.
pub struct CabacEntropy<'a, E: CabacEngine> {
    reader: NaluReader<'a>,
    engine: E,
}

impl<'a, E: CabacEngine> CabacEntropy<'a, E> {
    pub fn new(reader: NaluReader<'a>, engine: E) -> Self {
        Self { reader, engine }
    }

    fn level(abs_level_minus1: u32, sign: bool) -> Result<i32, SyntaxError> {
        let magnitude = i32::try_from(abs_level_minus1 + 1).map_err(|_| {
            SyntaxError::malformed(SyntaxElement::CoeffAbsLevelMinus1, "level overflow")
        })?;
        Ok(magnitude * (1 - 2 * i32::from(sign)))
    }
}

impl<E: CabacEngine> EntropyRead for CabacEntropy<'_, E> {
    const CABAC: bool = true;

    fn begin_slice_data(&mut self) -> Result<(), SyntaxError> {
        // cabac_alignment_one_bit padding, then engine initialization from
        // the aligned position.
        self.reader
            .skip_to_byte_alignment()
            .map_err(|_| SyntaxError::UnexpectedEndOfData(SyntaxElement::CabacAlignmentOneBit))?;
        self.engine.init(&mut self.reader)
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
        self.engine.resume(&mut self.reader)
    }

    fn read_flag(&mut self, elem: SyntaxElement) -> Result<bool, SyntaxError> {
        Ok(self.engine.read_symbol(&mut self.reader, elem)? != 0)
    }

    fn read_bits(&mut self, elem: SyntaxElement, _num_bits: usize) -> Result<u32, SyntaxError> {
        self.engine.read_symbol(&mut self.reader, elem)
    }

    fn read_ue(&mut self, elem: SyntaxElement) -> Result<u32, SyntaxError> {
        self.engine.read_symbol(&mut self.reader, elem)
    }

    fn read_se(&mut self, elem: SyntaxElement) -> Result<i32, SyntaxError> {
        self.engine.read_signed_symbol(&mut self.reader, elem)
    }

    fn read_te(&mut self, elem: SyntaxElement, max: u32) -> Result<u32, SyntaxError> {
        let value = self.engine.read_symbol(&mut self.reader, elem)?;
        if value > max {
            return Err(SyntaxError::malformed(
                elem,
                format!("value {} exceeds the legal maximum {}", value, max),
            ));
        }
        Ok(value)
    }

    fn read_me(
        &mut self,
        elem: SyntaxElement,
        _intra: bool,
        chroma_array_type: u8,
    ) -> Result<u32, SyntaxError> {
        let value = self.engine.read_symbol(&mut self.reader, elem)?;
        let max = if matches!(chroma_array_type, 1 | 2) {
            47
        } else {
            15
        };
        if value > max {
            return Err(SyntaxError::malformed(
                elem,
                format!("coded block pattern {} out of range", value),
            ));
        }
        Ok(value)
    }

    fn read_residual_block(
        &mut self,
        coeff: &mut [i32],
        blk: ResidualBlock,
    ) -> Result<(), SyntaxError> {
        let max_num_coeff = coeff.len();

        // coded_block_flag is only coded for blocks that have a dedicated
        // context; 8x8 luma blocks are always coded.
        let coded_block_flag = if max_num_coeff == 64 {
            true
        } else {
            self.engine.read_coeff_symbol(
                &mut self.reader,
                SyntaxElement::CodedBlockFlag,
                blk,
                0,
            )? != 0
        };
        if !coded_block_flag {
            coeff.fill(0);
            return Ok(());
        }

        // The significance scan: at most maxNumCoeff - 1 flag pairs; the
        // last coefficient's significance is implied.
        let mut significant = [false; 64];
        let mut num_coeff = max_num_coeff;
        let mut i = 0;
        loop {
            let flag = self.engine.read_coeff_symbol(
                &mut self.reader,
                SyntaxElement::SignificantCoeffFlag,
                blk,
                i,
            )? != 0;
            significant[i] = flag;
            if flag {
                let last = self.engine.read_coeff_symbol(
                    &mut self.reader,
                    SyntaxElement::LastSignificantCoeffFlag,
                    blk,
                    i,
                )? != 0;
                if last {
                    num_coeff = i + 1;
                    coeff[num_coeff..].fill(0);
                    break;
                }
            }
            i += 1;
            if i + 1 >= num_coeff {
                break;
            }
        }
        trace!("residual block {:?}: numCoeff={}", blk, num_coeff);

        // Magnitudes and signs run from the highest-frequency coefficient
        // down; the one at numCoeff - 1 is always present.
        let abs_level_minus1 = self.engine.read_coeff_symbol(
            &mut self.reader,
            SyntaxElement::CoeffAbsLevelMinus1,
            blk,
            num_coeff - 1,
        )?;
        let sign = self.engine.read_coeff_symbol(
            &mut self.reader,
            SyntaxElement::CoeffSignFlag,
            blk,
            num_coeff - 1,
        )? != 0;
        coeff[num_coeff - 1] = Self::level(abs_level_minus1, sign)?;

        for i in (0..num_coeff - 1).rev() {
            if significant[i] {
                let abs_level_minus1 = self.engine.read_coeff_symbol(
                    &mut self.reader,
                    SyntaxElement::CoeffAbsLevelMinus1,
                    blk,
                    i,
                )?;
                let sign = self.engine.read_coeff_symbol(
                    &mut self.reader,
                    SyntaxElement::CoeffSignFlag,
                    blk,
                    i,
                )? != 0;
                coeff[i] = Self::level(abs_level_minus1, sign)?;
            } else {
                coeff[i] = 0;
            }
        }

        Ok(())
    }

    fn more_slice_data(&mut self) -> Result<bool, SyntaxError> {
        Ok(!self.engine.read_end_of_slice_flag(&mut self.reader)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    use super::*;

    /// Observable state of a [`ScriptedEngine`], shared so tests can inspect
    /// it after the engine has been moved into a parser.
    #[derive(Default)]
    pub(crate) struct EngineState {
        pub script: VecDeque<(SyntaxElement, i64)>,
        pub end_of_slice_reads: usize,
        pub inits: usize,
        pub resumes: usize,
    }

    /// A scripted arithmetic engine: each read pops the next `(element,
    /// value)` pair and fails when the grammar requests a different element
    /// than the script expects.
    #[derive(Default)]
    pub(crate) struct ScriptedEngine {
        pub state: Rc<RefCell<EngineState>>,
    }

    impl ScriptedEngine {
        pub fn new(script: impl IntoIterator<Item = (SyntaxElement, i64)>) -> Self {
            ScriptedEngine {
                state: Rc::new(RefCell::new(EngineState {
                    script: script.into_iter().collect(),
                    ..Default::default()
                })),
            }
        }

        fn next(&mut self, elem: SyntaxElement) -> Result<i64, SyntaxError> {
            match self.state.borrow_mut().script.pop_front() {
                Some((scripted, value)) if scripted == elem => Ok(value),
                Some((scripted, _)) => Err(SyntaxError::malformed(
                    elem,
                    format!("script expected {}", scripted),
                )),
                None => Err(SyntaxError::UnexpectedEndOfData(elem)),
            }
        }
    }

    impl CabacEngine for ScriptedEngine {
        fn init(&mut self, _reader: &mut NaluReader<'_>) -> Result<(), SyntaxError> {
            self.state.borrow_mut().inits += 1;
            Ok(())
        }

        fn resume(&mut self, _reader: &mut NaluReader<'_>) -> Result<(), SyntaxError> {
            self.state.borrow_mut().resumes += 1;
            Ok(())
        }

        fn read_symbol(
            &mut self,
            _reader: &mut NaluReader<'_>,
            elem: SyntaxElement,
        ) -> Result<u32, SyntaxError> {
            self.next(elem).map(|v| v as u32)
        }

        fn read_signed_symbol(
            &mut self,
            _reader: &mut NaluReader<'_>,
            elem: SyntaxElement,
        ) -> Result<i32, SyntaxError> {
            self.next(elem).map(|v| v as i32)
        }

        fn read_coeff_symbol(
            &mut self,
            _reader: &mut NaluReader<'_>,
            elem: SyntaxElement,
            _blk: ResidualBlock,
            _scan_idx: usize,
        ) -> Result<u32, SyntaxError> {
            self.next(elem).map(|v| v as u32)
        }

        fn read_end_of_slice_flag(
            &mut self,
            _reader: &mut NaluReader<'_>,
        ) -> Result<bool, SyntaxError> {
            self.state.borrow_mut().end_of_slice_reads += 1;
            self.next(SyntaxElement::EndOfSliceFlag).map(|v| v != 0)
        }
    }

    fn entropy(engine: ScriptedEngine) -> CabacEntropy<'static, ScriptedEngine> {
        CabacEntropy::new(NaluReader::new(&[]), engine)
    }

    use SyntaxElement::*;

    #[test]
    fn unset_coded_block_flag_zeroes_the_block() {
        let mut cabac = entropy(ScriptedEngine::new([(CodedBlockFlag, 0)]));

        let mut coeff = [7i32; 16];
        cabac
            .read_residual_block(&mut coeff, ResidualBlock::LumaLevel { blk_idx: 0 })
            .unwrap();
        assert_eq!(coeff, [0; 16]);
        assert!(cabac.engine.state.borrow().script.is_empty());
    }

    #[test]
    fn significance_scan_and_levels() {
        let mut cabac = entropy(ScriptedEngine::new([
            (CodedBlockFlag, 1),
            (SignificantCoeffFlag, 0),
            (SignificantCoeffFlag, 1),
            (LastSignificantCoeffFlag, 0),
            (SignificantCoeffFlag, 1),
            (LastSignificantCoeffFlag, 1),
            // numCoeff is now 3; the highest-frequency level comes first.
            (CoeffAbsLevelMinus1, 4),
            (CoeffSignFlag, 1),
            (CoeffAbsLevelMinus1, 0),
            (CoeffSignFlag, 0),
        ]));

        let mut coeff = [9i32; 16];
        cabac
            .read_residual_block(&mut coeff, ResidualBlock::LumaLevel { blk_idx: 3 })
            .unwrap();

        let mut expected = [0i32; 16];
        expected[1] = 1;
        expected[2] = -5;
        assert_eq!(coeff, expected);
        assert!(cabac.engine.state.borrow().script.is_empty());
    }

    #[test]
    fn eight_by_eight_blocks_skip_coded_block_flag() {
        let mut cabac = entropy(ScriptedEngine::new([
            (SignificantCoeffFlag, 1),
            (LastSignificantCoeffFlag, 1),
            (CoeffAbsLevelMinus1, 2),
            (CoeffSignFlag, 0),
        ]));

        let mut coeff = [1i32; 64];
        cabac
            .read_residual_block(&mut coeff, ResidualBlock::LumaLevel8x8 { blk_idx: 0 })
            .unwrap();
        assert_eq!(coeff[0], 3);
        assert_eq!(&coeff[1..], &[0; 63]);
        assert!(cabac.engine.state.borrow().script.is_empty());
    }

    #[test]
    fn scan_without_last_flag_runs_to_max_num_coeff() {
        // No coefficient is flagged significant before the scan cutoff at
        // maxNumCoeff - 1; the final coefficient is still read.
        let mut cabac = entropy(ScriptedEngine::new([
            (CodedBlockFlag, 1),
            (SignificantCoeffFlag, 0),
            (SignificantCoeffFlag, 0),
            (SignificantCoeffFlag, 0),
            (CoeffAbsLevelMinus1, 0),
            (CoeffSignFlag, 1),
        ]));

        let mut coeff = [5i32; 4];
        cabac
            .read_residual_block(&mut coeff, ResidualBlock::ChromaDcLevel { plane: 1 })
            .unwrap();
        assert_eq!(coeff, [0, 0, 0, -1]);
        assert!(cabac.engine.state.borrow().script.is_empty());
    }

    #[test]
    fn decoded_num_coeff_stays_in_bounds() {
        for max_num_coeff in [4usize, 15, 16] {
            // last_significant_coeff_flag on the very first coefficient.
            let mut cabac = entropy(ScriptedEngine::new([
                (CodedBlockFlag, 1),
                (SignificantCoeffFlag, 1),
                (LastSignificantCoeffFlag, 1),
                (CoeffAbsLevelMinus1, 7),
                (CoeffSignFlag, 0),
            ]));

            let mut coeff = vec![3i32; max_num_coeff];
            cabac
                .read_residual_block(&mut coeff, ResidualBlock::LumaLevel { blk_idx: 0 })
                .unwrap();
            assert_eq!(coeff[0], 8);
            assert!(coeff[1..].iter().all(|c| *c == 0));
        }
    }
}
