// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The entropy-coding seam of the slice-data grammar.
//!
//! The grammar is shared between CAVLC and CABAC; what differs is how each
//! syntax element is read. [`EntropyRead`] models that as one capability with
//! one read operation per syntax-element kind, implemented once per scheme
//! and selected statically when the slice parser is instantiated.
//!
//! The pieces clause 9 defines outside the slice-data grammar stay behind
//! collaborator traits: the CAVLC VLC tables ([`CavlcTables`]) and the CABAC
//! arithmetic decoding engine ([`CabacEngine`]).

use std::fmt;

use thiserror::Error;

use crate::codec::h264::nalu_reader::NaluReader;

/// The syntax elements of clauses 7.3.4 and 7.3.5, named for error reporting
/// and for parameterizing context-coded reads.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyntaxElement {
    MbSkipRun,
    MbSkipFlag,
    MbFieldDecodingFlag,
    EndOfSliceFlag,
    MbType,
    SubMbType,
    TransformSize8x8Flag,
    CodedBlockPattern,
    MbQpDelta,
    CabacAlignmentOneBit,
    PcmAlignmentZeroBit,
    PcmSampleLuma,
    PcmSampleChroma,
    PrevIntra4x4PredModeFlag,
    RemIntra4x4PredMode,
    PrevIntra8x8PredModeFlag,
    RemIntra8x8PredMode,
    IntraChromaPredMode,
    RefIdxL0,
    RefIdxL1,
    MvdL0,
    MvdL1,
    CoeffToken,
    TrailingOnesSignFlag,
    LevelPrefix,
    LevelSuffix,
    TotalZeros,
    RunBefore,
    CodedBlockFlag,
    SignificantCoeffFlag,
    LastSignificantCoeffFlag,
    CoeffAbsLevelMinus1,
    CoeffSignFlag,
}

impl SyntaxElement {
    /// The element's name as written in the specification's syntax tables.
    pub fn name(&self) -> &'static str {
        match self {
            SyntaxElement::MbSkipRun => "mb_skip_run",
            SyntaxElement::MbSkipFlag => "mb_skip_flag",
            SyntaxElement::MbFieldDecodingFlag => "mb_field_decoding_flag",
            SyntaxElement::EndOfSliceFlag => "end_of_slice_flag",
            SyntaxElement::MbType => "mb_type",
            SyntaxElement::SubMbType => "sub_mb_type",
            SyntaxElement::TransformSize8x8Flag => "transform_size_8x8_flag",
            SyntaxElement::CodedBlockPattern => "coded_block_pattern",
            SyntaxElement::MbQpDelta => "mb_qp_delta",
            SyntaxElement::CabacAlignmentOneBit => "cabac_alignment_one_bit",
            SyntaxElement::PcmAlignmentZeroBit => "pcm_alignment_zero_bit",
            SyntaxElement::PcmSampleLuma => "pcm_sample_luma",
            SyntaxElement::PcmSampleChroma => "pcm_sample_chroma",
            SyntaxElement::PrevIntra4x4PredModeFlag => "prev_intra4x4_pred_mode_flag",
            SyntaxElement::RemIntra4x4PredMode => "rem_intra4x4_pred_mode",
            SyntaxElement::PrevIntra8x8PredModeFlag => "prev_intra8x8_pred_mode_flag",
            SyntaxElement::RemIntra8x8PredMode => "rem_intra8x8_pred_mode",
            SyntaxElement::IntraChromaPredMode => "intra_chroma_pred_mode",
            SyntaxElement::RefIdxL0 => "ref_idx_l0",
            SyntaxElement::RefIdxL1 => "ref_idx_l1",
            SyntaxElement::MvdL0 => "mvd_l0",
            SyntaxElement::MvdL1 => "mvd_l1",
            SyntaxElement::CoeffToken => "coeff_token",
            SyntaxElement::TrailingOnesSignFlag => "trailing_ones_sign_flag",
            SyntaxElement::LevelPrefix => "level_prefix",
            SyntaxElement::LevelSuffix => "level_suffix",
            SyntaxElement::TotalZeros => "total_zeros",
            SyntaxElement::RunBefore => "run_before",
            SyntaxElement::CodedBlockFlag => "coded_block_flag",
            SyntaxElement::SignificantCoeffFlag => "significant_coeff_flag",
            SyntaxElement::LastSignificantCoeffFlag => "last_significant_coeff_flag",
            SyntaxElement::CoeffAbsLevelMinus1 => "coeff_abs_level_minus1",
            SyntaxElement::CoeffSignFlag => "coeff_sign_flag",
        }
    }
}

impl fmt::Display for SyntaxElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifies one residual coefficient block within a macroblock. Carried
/// through the coefficient decoders so collaborators can derive their
/// per-block contexts (ctxBlockCat, the nC lookup).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResidualBlock {
    /// The 16-coefficient DC block of an Intra_16x16 macroblock.
    Intra16x16DcLevel,
    /// A 15-coefficient AC block of an Intra_16x16 macroblock.
    Intra16x16AcLevel { blk_idx: usize },
    /// A 16-coefficient 4x4 luma block.
    LumaLevel { blk_idx: usize },
    /// A 64-coefficient 8x8 luma block.
    LumaLevel8x8 { blk_idx: usize },
    /// A chroma DC block; 4 * NumC8x8 coefficients.
    ChromaDcLevel { plane: usize },
    /// A 15-coefficient chroma AC block.
    ChromaAcLevel { plane: usize, blk_idx: usize },
}

/// Why a slice-data decode failed. None of these is recoverable: every
/// subsequent read depends on the bit alignment established by its
/// predecessors, so the slice is abandoned at the first error.
#[derive(Debug, Error)]
pub enum SyntaxError {
    /// A decoded value is outside the legal domain of its syntax element.
    #[error("malformed {elem}: {reason}")]
    MalformedSyntax {
        elem: SyntaxElement,
        reason: String,
    },

    /// The cursor ran out of data in the middle of a symbol.
    #[error("bitstream exhausted while reading {0}")]
    UnexpectedEndOfData(SyntaxElement),

    /// A legally-specified combination this implementation does not decode.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(&'static str),
}

impl SyntaxError {
    pub fn malformed(elem: SyntaxElement, reason: impl ToString) -> Self {
        SyntaxError::MalformedSyntax {
            elem,
            reason: reason.to_string(),
        }
    }
}

/// A [`SyntaxError`] annotated with the macroblock address it occurred at.
#[derive(Debug, Error)]
#[error("macroblock {mb_addr}: {source}")]
pub struct SliceDataError {
    pub mb_addr: u32,
    #[source]
    pub source: SyntaxError,
}

impl SliceDataError {
    pub fn at(mb_addr: u32, source: SyntaxError) -> Self {
        SliceDataError { mb_addr, source }
    }
}

/// One read operation per syntax-element kind of the slice-data grammar.
///
/// Implemented by [`crate::codec::h264::cavlc::CavlcEntropy`] and
/// [`crate::codec::h264::cabac::CabacEntropy`]. The slice parser is generic
/// over this trait and prunes the scheme-specific grammar arms on
/// [`EntropyRead::CABAC`] at compile time.
pub trait EntropyRead {
    /// Whether this implementation decodes the CABAC arm of the grammar.
    const CABAC: bool;

    /// Prepares the entropy layer at the start of slice data: under CABAC
    /// this consumes `cabac_alignment_one_bit` padding and initializes the
    /// arithmetic engine.
    fn begin_slice_data(&mut self) -> Result<(), SyntaxError>;

    /// Discards `pcm_alignment_zero_bit` padding up to the next byte
    /// boundary.
    fn align_to_byte(&mut self) -> Result<(), SyntaxError>;

    /// One raw 8-bit PCM sample, read outside entropy coding.
    fn read_pcm_byte(&mut self, elem: SyntaxElement) -> Result<u8, SyntaxError>;

    /// Restores entropy decoding after a run of PCM samples.
    fn resume_after_pcm(&mut self) -> Result<(), SyntaxError>;

    /// u(1) | ae(v)
    fn read_flag(&mut self, elem: SyntaxElement) -> Result<bool, SyntaxError>;

    /// u(n) | ae(v)
    fn read_bits(&mut self, elem: SyntaxElement, num_bits: usize) -> Result<u32, SyntaxError>;

    /// ue(v) | ae(v)
    fn read_ue(&mut self, elem: SyntaxElement) -> Result<u32, SyntaxError>;

    /// se(v) | ae(v)
    fn read_se(&mut self, elem: SyntaxElement) -> Result<i32, SyntaxError>;

    /// te(v) | ae(v). `max` is the largest legal value of the element.
    fn read_te(&mut self, elem: SyntaxElement, max: u32) -> Result<u32, SyntaxError>;

    /// me(v) | ae(v): the coded block pattern, mapped per Table 9-4 under
    /// CAVLC.
    fn read_me(
        &mut self,
        elem: SyntaxElement,
        intra: bool,
        chroma_array_type: u8,
    ) -> Result<u32, SyntaxError>;

    /// Decodes one residual coefficient block into `coeff`, whose length is
    /// maxNumCoeff. Every slot is written: selected coefficients with their
    /// levels, everything else with zero.
    fn read_residual_block(
        &mut self,
        coeff: &mut [i32],
        blk: ResidualBlock,
    ) -> Result<(), SyntaxError>;

    /// Whether more slice data follows: the more_rbsp_data() predicate under
    /// CAVLC, a fresh `end_of_slice_flag` read under CABAC.
    fn more_slice_data(&mut self) -> Result<bool, SyntaxError>;
}

/// The CAVLC VLC tables of clause 9.2 that the coefficient decoder consumes:
/// `coeff_token`, `total_zeros` and `run_before` are dense standard tables
/// selected by context, supplied by the caller.
pub trait CavlcTables {
    /// coeff_token, clause 9.2.1. Returns `(TotalCoeff, TrailingOnes)`.
    fn read_coeff_token(
        &mut self,
        reader: &mut NaluReader<'_>,
        blk: ResidualBlock,
        max_num_coeff: usize,
    ) -> Result<(u8, u8), SyntaxError>;

    /// total_zeros, clause 9.2.3.
    fn read_total_zeros(
        &mut self,
        reader: &mut NaluReader<'_>,
        total_coeff: u8,
        max_num_coeff: usize,
    ) -> Result<u32, SyntaxError>;

    /// run_before, clause 9.2.3.
    fn read_run_before(
        &mut self,
        reader: &mut NaluReader<'_>,
        zeros_left: u32,
    ) -> Result<u32, SyntaxError>;
}

/// The CABAC arithmetic decoding engine of clause 9.3. Context modeling,
/// binarization and renormalization all live behind this trait; each read
/// yields the decoded value of one syntax element.
pub trait CabacEngine {
    /// Initializes the engine from the aligned cursor position, clause
    /// 9.3.1.2.
    fn init(&mut self, reader: &mut NaluReader<'_>) -> Result<(), SyntaxError>;

    /// Re-initializes the engine after PCM samples, clause 9.3.1.2.
    fn resume(&mut self, reader: &mut NaluReader<'_>) -> Result<(), SyntaxError>;

    /// Decodes the value of one context-coded syntax element.
    fn read_symbol(
        &mut self,
        reader: &mut NaluReader<'_>,
        elem: SyntaxElement,
    ) -> Result<u32, SyntaxError>;

    /// Decodes the value of one signed context-coded syntax element
    /// (`mvd_lX`, `mb_qp_delta`).
    fn read_signed_symbol(
        &mut self,
        reader: &mut NaluReader<'_>,
        elem: SyntaxElement,
    ) -> Result<i32, SyntaxError>;

    /// Decodes one residual-block symbol, with the block and scan position
    /// available for context derivation.
    fn read_coeff_symbol(
        &mut self,
        reader: &mut NaluReader<'_>,
        elem: SyntaxElement,
        blk: ResidualBlock,
        scan_idx: usize,
    ) -> Result<u32, SyntaxError>;

    /// Decodes `end_of_slice_flag`.
    fn read_end_of_slice_flag(&mut self, reader: &mut NaluReader<'_>)
        -> Result<bool, SyntaxError>;
}
