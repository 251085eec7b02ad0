// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parsing of the slice_data() syntax of clause 7.3.4 and the macroblock
//! layer below it (clauses 7.3.5 through 7.3.5.3).
//!
//! The parser walks the macroblock addresses of one slice, decoding each
//! addressed macroblock's type, prediction signaling, coded block pattern and
//! transform-coefficient residuals. It is generic over the entropy scheme:
//! instantiate it with [`crate::codec::h264::cavlc::CavlcEntropy`] or
//! [`crate::codec::h264::cabac::CabacEntropy`] according to the picture's
//! `entropy_coding_mode_flag`.

use log::debug;
use log::trace;

use crate::codec::h264::entropy::EntropyRead;
use crate::codec::h264::entropy::ResidualBlock;
use crate::codec::h264::entropy::SliceDataError;
use crate::codec::h264::entropy::SyntaxElement;
use crate::codec::h264::entropy::SyntaxError;
use crate::codec::h264::macroblock::Macroblock;
use crate::codec::h264::mb_type::MbType;
use crate::codec::h264::mb_type::PredMode;
use crate::codec::h264::mb_type::SubMbType;
use crate::codec::h264::params::Pps;
use crate::codec::h264::params::SliceHeader;

/// The address-increment rule. Slice groups are not supported, so the next
/// address is the successor; under MBAFF this steps through the members of
/// each (2k, 2k+1) pair in order.
fn next_mb_address(mb_addr: u32) -> u32 {
    mb_addr + 1
}

/// Decodes the slice_data() of one slice into macroblock records.
///
/// The entropy scheme is fixed when the parser is built and stays fixed for
/// the whole slice. Decoding is strictly sequential; on the first error the
/// slice is abandoned and the error is returned with the failing macroblock
/// address attached.
pub struct SliceDataParser<'a, E: EntropyRead> {
    pps: &'a Pps,
    header: &'a SliceHeader,
    entropy: E,
    mbaff_frame_flag: bool,
    pic_size_in_mbs: u32,
    curr_mb_addr: u32,
    /// The value of `mb_field_decoding_flag` in effect; inherited by
    /// macroblocks the flag is not coded for.
    field_decoding_flag: bool,
}

impl<'a, E: EntropyRead> SliceDataParser<'a, E> {
    pub fn new(pps: &'a Pps, header: &'a SliceHeader, entropy: E) -> Self {
        debug_assert_eq!(
            pps.entropy_coding_mode_flag,
            E::CABAC,
            "entropy reader does not match entropy_coding_mode_flag"
        );
        let mbaff_frame_flag = header.mbaff_frame_flag(&pps.sps);
        Self {
            pps,
            header,
            entropy,
            mbaff_frame_flag,
            pic_size_in_mbs: pps.sps.pic_size_in_mbs(header.field_pic_flag),
            curr_mb_addr: header.first_mb_in_slice * (1 + u32::from(mbaff_frame_flag)),
            field_decoding_flag: header.field_pic_flag,
        }
    }

    /// Decodes the whole slice data, consuming the parser. Skipped
    /// macroblocks advance the address sequence without producing a record.
    pub fn parse(mut self) -> Result<Vec<Macroblock>, SliceDataError> {
        debug!(
            "slice data: {:?} slice, first_mb_in_slice {}, mbaff {}, cabac {}",
            self.header.slice_type, self.header.first_mb_in_slice, self.mbaff_frame_flag, E::CABAC
        );

        self.element(|e| e.begin_slice_data())?;

        let mut macroblocks = Vec::new();
        let skip_signaled = self.header.slice_type.has_skip_signaling();
        let mut more_data = true;
        let mut prev_mb_skipped = false;
        loop {
            let mut mb_skip_flag = false;
            if skip_signaled {
                if E::CABAC {
                    mb_skip_flag = self.element(|e| e.read_flag(SyntaxElement::MbSkipFlag))?;
                    more_data = !mb_skip_flag;
                } else {
                    let mb_skip_run: u32 = self.element(|e| e.read_ue(SyntaxElement::MbSkipRun))?;
                    if mb_skip_run > self.pic_size_in_mbs.saturating_sub(self.curr_mb_addr) {
                        return Err(self.error(SyntaxError::malformed(
                            SyntaxElement::MbSkipRun,
                            format!("run of {} skips past the end of the picture", mb_skip_run),
                        )));
                    }
                    prev_mb_skipped = mb_skip_run > 0;
                    for _ in 0..mb_skip_run {
                        self.curr_mb_addr = next_mb_address(self.curr_mb_addr);
                    }
                    more_data = self.element(|e| e.more_slice_data())?;
                }
            }

            if more_data {
                if self.curr_mb_addr >= self.pic_size_in_mbs {
                    return Err(self.error(SyntaxError::malformed(
                        SyntaxElement::MbType,
                        "slice data extends past the end of the picture",
                    )));
                }
                if self.mbaff_frame_flag
                    && (self.curr_mb_addr % 2 == 0
                        || (self.curr_mb_addr % 2 == 1 && prev_mb_skipped))
                {
                    self.field_decoding_flag =
                        self.element(|e| e.read_flag(SyntaxElement::MbFieldDecodingFlag))?;
                }
                macroblocks.push(self.macroblock_layer()?);
            }

            if E::CABAC {
                if skip_signaled {
                    prev_mb_skipped = mb_skip_flag;
                }
                // The second member of an MBAFF pair is always coded, so no
                // end_of_slice_flag is sent between pair members.
                if self.mbaff_frame_flag && self.curr_mb_addr % 2 == 0 {
                    more_data = true;
                } else {
                    more_data = self.element(|e| e.more_slice_data())?;
                }
            } else {
                more_data = self.element(|e| e.more_slice_data())?;
            }
            self.curr_mb_addr = next_mb_address(self.curr_mb_addr);

            if !more_data {
                break;
            }
        }

        debug!("slice data: decoded {} macroblocks", macroblocks.len());
        Ok(macroblocks)
    }

    /// macroblock_layer(), clause 7.3.5.
    fn macroblock_layer(&mut self) -> Result<Macroblock, SliceDataError> {
        let mut mb = Macroblock::new(self.curr_mb_addr);
        mb.mb_field_decoding_flag = self.field_decoding_flag;

        let code: u32 = self.element(|e| e.read_ue(SyntaxElement::MbType))?;
        let mb_type = MbType::from_code(self.header.slice_type, code).ok_or_else(|| {
            self.error(SyntaxError::malformed(
                SyntaxElement::MbType,
                format!(
                    "code {} has no entry in the {:?}-slice table",
                    code, self.header.slice_type
                ),
            ))
        })?;
        mb.mb_type = mb_type;
        trace!("mb {}: {:?}", self.curr_mb_addr, mb_type);

        if mb_type == MbType::IPcm {
            self.pcm_samples(&mut mb)?;
            return Ok(mb);
        }

        let mut no_sub_mb_part_size_less_than_8x8 = true;
        let mut transform_size_8x8 = false;
        if mb_type != MbType::INxN
            && mb_type.mb_part_pred_mode(0, false) != PredMode::Intra16x16
            && mb_type.num_mb_part() == 4
        {
            let sub_mb_types = self.sub_mb_pred(&mut mb)?;
            for sub_mb_type in sub_mb_types {
                match sub_mb_type {
                    SubMbType::BDirect8x8 => {
                        if !self.pps.sps.direct_8x8_inference_flag {
                            no_sub_mb_part_size_less_than_8x8 = false;
                        }
                    }
                    other => {
                        if other.num_sub_mb_part() > 1 {
                            no_sub_mb_part_size_less_than_8x8 = false;
                        }
                    }
                }
            }
        } else {
            if self.pps.transform_8x8_mode_flag && mb_type == MbType::INxN {
                transform_size_8x8 =
                    self.element(|e| e.read_flag(SyntaxElement::TransformSize8x8Flag))?;
                mb.transform_size_8x8_flag = transform_size_8x8;
            }
            self.mb_pred(&mut mb, transform_size_8x8)?;
        }

        let cbp_luma;
        let cbp_chroma;
        if let Some(cbp) = mb_type.derived_coded_block_pattern() {
            mb.coded_block_pattern = cbp;
            cbp_luma = cbp % 16;
            cbp_chroma = cbp / 16;
        } else {
            let intra = mb_type.mb_part_pred_mode(0, transform_size_8x8).is_intra();
            let chroma_array_type = self.pps.sps.chroma_array_type();
            let cbp = self.element(|e| {
                e.read_me(SyntaxElement::CodedBlockPattern, intra, chroma_array_type)
            })?;
            mb.coded_block_pattern = cbp;
            cbp_luma = cbp % 16;
            cbp_chroma = cbp / 16;

            if cbp_luma > 0
                && self.pps.transform_8x8_mode_flag
                && mb_type != MbType::INxN
                && no_sub_mb_part_size_less_than_8x8
                && (mb_type != MbType::BDirect16x16 || self.pps.sps.direct_8x8_inference_flag)
            {
                transform_size_8x8 =
                    self.element(|e| e.read_flag(SyntaxElement::TransformSize8x8Flag))?;
                mb.transform_size_8x8_flag = transform_size_8x8;
            }
        }

        if cbp_luma > 0
            || cbp_chroma > 0
            || mb_type.mb_part_pred_mode(0, transform_size_8x8) == PredMode::Intra16x16
        {
            let mb_qp_delta = self.element(|e| e.read_se(SyntaxElement::MbQpDelta))?;
            if !(-26..=25).contains(&mb_qp_delta) {
                return Err(self.error(SyntaxError::malformed(
                    SyntaxElement::MbQpDelta,
                    format!("value {} outside [-26, 25]", mb_qp_delta),
                )));
            }
            mb.mb_qp_delta = mb_qp_delta;
            self.residual(&mut mb, cbp_luma, cbp_chroma)?;
        }

        Ok(mb)
    }

    /// The I_PCM escape: raw samples, byte-aligned, with no entropy coding in
    /// between.
    fn pcm_samples(&mut self, mb: &mut Macroblock) -> Result<(), SliceDataError> {
        self.element(|e| e.align_to_byte())?;

        for sample in mb.pcm_sample_luma.iter_mut() {
            *sample = self.element(|e| e.read_pcm_byte(SyntaxElement::PcmSampleLuma))?;
        }

        let (mb_width_c, mb_height_c) = self.pps.sps.mb_width_height_c();
        let num_chroma_samples = (2 * mb_width_c * mb_height_c) as usize;
        for sample in mb.pcm_sample_chroma.iter_mut().take(num_chroma_samples) {
            *sample = self.element(|e| e.read_pcm_byte(SyntaxElement::PcmSampleChroma))?;
        }

        self.element(|e| e.resume_after_pcm())
    }

    /// mb_pred(), clause 7.3.5.1.
    fn mb_pred(&mut self, mb: &mut Macroblock, transform_size_8x8: bool) -> Result<(), SliceDataError> {
        let pred_mode = mb.mb_type.mb_part_pred_mode(0, transform_size_8x8);
        match pred_mode {
            PredMode::Intra4x4 | PredMode::Intra8x8 | PredMode::Intra16x16 => {
                if pred_mode == PredMode::Intra4x4 {
                    for blk_idx in 0..16 {
                        let predicted = self
                            .element(|e| e.read_flag(SyntaxElement::PrevIntra4x4PredModeFlag))?;
                        mb.prev_intra4x4_pred_mode_flag[blk_idx] = predicted;
                        if !predicted {
                            mb.rem_intra4x4_pred_mode[blk_idx] = self
                                .intra_pred_mode(SyntaxElement::RemIntra4x4PredMode)?;
                        }
                    }
                }
                if pred_mode == PredMode::Intra8x8 {
                    for blk_idx in 0..4 {
                        let predicted = self
                            .element(|e| e.read_flag(SyntaxElement::PrevIntra8x8PredModeFlag))?;
                        mb.prev_intra8x8_pred_mode_flag[blk_idx] = predicted;
                        if !predicted {
                            mb.rem_intra8x8_pred_mode[blk_idx] = self
                                .intra_pred_mode(SyntaxElement::RemIntra8x8PredMode)?;
                        }
                    }
                }
                if matches!(self.pps.sps.chroma_array_type(), 1 | 2) {
                    let mode =
                        self.element(|e| e.read_ue(SyntaxElement::IntraChromaPredMode))?;
                    if mode > 3 {
                        return Err(self.error(SyntaxError::malformed(
                            SyntaxElement::IntraChromaPredMode,
                            format!("mode {} out of range", mode),
                        )));
                    }
                    mb.intra_chroma_pred_mode = mode as u8;
                }
            }
            PredMode::Direct => {}
            _ => {
                let num_mb_part = mb.mb_type.num_mb_part();
                let (max_ref_idx_l0, max_ref_idx_l1) = self.ref_idx_bounds(mb);

                for part_idx in 0..num_mb_part {
                    if (self.header.num_ref_idx_l0_active_minus1 > 0 || mb.mb_field_decoding_flag)
                        && mb.mb_type.mb_part_pred_mode(part_idx, false) != PredMode::PredL1
                    {
                        mb.ref_idx_l0[part_idx] = self
                            .element(|e| e.read_te(SyntaxElement::RefIdxL0, max_ref_idx_l0))?
                            as u8;
                    }
                }
                for part_idx in 0..num_mb_part {
                    if (self.header.num_ref_idx_l1_active_minus1 > 0 || mb.mb_field_decoding_flag)
                        && mb.mb_type.mb_part_pred_mode(part_idx, false) != PredMode::PredL0
                    {
                        mb.ref_idx_l1[part_idx] = self
                            .element(|e| e.read_te(SyntaxElement::RefIdxL1, max_ref_idx_l1))?
                            as u8;
                    }
                }
                for part_idx in 0..num_mb_part {
                    if mb.mb_type.mb_part_pred_mode(part_idx, false) != PredMode::PredL1 {
                        for comp_idx in 0..2 {
                            mb.mvd_l0[part_idx][0][comp_idx] =
                                self.element(|e| e.read_se(SyntaxElement::MvdL0))?;
                        }
                    }
                }
                for part_idx in 0..num_mb_part {
                    if mb.mb_type.mb_part_pred_mode(part_idx, false) != PredMode::PredL0 {
                        for comp_idx in 0..2 {
                            mb.mvd_l1[part_idx][0][comp_idx] =
                                self.element(|e| e.read_se(SyntaxElement::MvdL1))?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// sub_mb_pred(), clause 7.3.5.2. Returns the four sub-macroblock types
    /// for the caller's partition-size checks.
    fn sub_mb_pred(&mut self, mb: &mut Macroblock) -> Result<[SubMbType; 4], SliceDataError> {
        let mut sub_mb_types = [SubMbType::PL08x8; 4];
        for (part_idx, sub_mb_type) in sub_mb_types.iter_mut().enumerate() {
            let code: u32 = self.element(|e| e.read_ue(SyntaxElement::SubMbType))?;
            *sub_mb_type = SubMbType::from_code(self.header.slice_type, code).ok_or_else(|| {
                self.error(SyntaxError::malformed(
                    SyntaxElement::SubMbType,
                    format!(
                        "code {} has no entry in the {:?}-slice table",
                        code, self.header.slice_type
                    ),
                ))
            })?;
            mb.sub_mb_type[part_idx] = Some(*sub_mb_type);
        }

        let (max_ref_idx_l0, max_ref_idx_l1) = self.ref_idx_bounds(mb);

        for (part_idx, sub_mb_type) in sub_mb_types.iter().enumerate() {
            if (self.header.num_ref_idx_l0_active_minus1 > 0 || mb.mb_field_decoding_flag)
                && mb.mb_type != MbType::P8x8Ref0
                && *sub_mb_type != SubMbType::BDirect8x8
                && sub_mb_type.sub_mb_pred_mode() != PredMode::PredL1
            {
                mb.ref_idx_l0[part_idx] = self
                    .element(|e| e.read_te(SyntaxElement::RefIdxL0, max_ref_idx_l0))?
                    as u8;
            }
        }
        for (part_idx, sub_mb_type) in sub_mb_types.iter().enumerate() {
            if (self.header.num_ref_idx_l1_active_minus1 > 0 || mb.mb_field_decoding_flag)
                && *sub_mb_type != SubMbType::BDirect8x8
                && sub_mb_type.sub_mb_pred_mode() != PredMode::PredL0
            {
                mb.ref_idx_l1[part_idx] = self
                    .element(|e| e.read_te(SyntaxElement::RefIdxL1, max_ref_idx_l1))?
                    as u8;
            }
        }
        for (part_idx, sub_mb_type) in sub_mb_types.iter().enumerate() {
            if *sub_mb_type != SubMbType::BDirect8x8
                && sub_mb_type.sub_mb_pred_mode() != PredMode::PredL1
            {
                for sub_part_idx in 0..sub_mb_type.num_sub_mb_part() {
                    for comp_idx in 0..2 {
                        mb.mvd_l0[part_idx][sub_part_idx][comp_idx] =
                            self.element(|e| e.read_se(SyntaxElement::MvdL0))?;
                    }
                }
            }
        }
        for (part_idx, sub_mb_type) in sub_mb_types.iter().enumerate() {
            if *sub_mb_type != SubMbType::BDirect8x8
                && sub_mb_type.sub_mb_pred_mode() != PredMode::PredL0
            {
                for sub_part_idx in 0..sub_mb_type.num_sub_mb_part() {
                    for comp_idx in 0..2 {
                        mb.mvd_l1[part_idx][sub_part_idx][comp_idx] =
                            self.element(|e| e.read_se(SyntaxElement::MvdL1))?;
                    }
                }
            }
        }

        Ok(sub_mb_types)
    }

    /// residual(), clause 7.3.5.3. Blocks whose gating bit is unset stay
    /// zero without consulting the entropy decoder.
    fn residual(
        &mut self,
        mb: &mut Macroblock,
        cbp_luma: u32,
        cbp_chroma: u32,
    ) -> Result<(), SliceDataError> {
        let intra_16x16 = matches!(mb.mb_type, MbType::I16x16 { .. });

        if intra_16x16 {
            let addr = self.curr_mb_addr;
            self.entropy
                .read_residual_block(&mut mb.intra16x16_dc_level, ResidualBlock::Intra16x16DcLevel)
                .map_err(|e| SliceDataError::at(addr, e))?;
        }

        for i8x8 in 0..4 {
            // CAVLC streams always group the coefficients of an 8x8 region as
            // four 4x4 scans, interleaved afterwards if the 8x8 transform is
            // in use.
            if !mb.transform_size_8x8_flag || !E::CABAC {
                for i4x4 in 0..4 {
                    let blk_idx = i8x8 * 4 + i4x4;
                    if cbp_luma & (1 << i8x8) != 0 {
                        let addr = self.curr_mb_addr;
                        if intra_16x16 {
                            self.entropy
                                .read_residual_block(
                                    &mut mb.intra16x16_ac_level[blk_idx],
                                    ResidualBlock::Intra16x16AcLevel { blk_idx },
                                )
                                .map_err(|e| SliceDataError::at(addr, e))?;
                        } else {
                            self.entropy
                                .read_residual_block(
                                    &mut mb.luma_level[blk_idx],
                                    ResidualBlock::LumaLevel { blk_idx },
                                )
                                .map_err(|e| SliceDataError::at(addr, e))?;
                        }
                    }
                    if !E::CABAC && mb.transform_size_8x8_flag {
                        for i in 0..16 {
                            mb.luma_level_8x8[i8x8][4 * i + i4x4] = mb.luma_level[blk_idx][i];
                        }
                    }
                }
            } else if cbp_luma & (1 << i8x8) != 0 {
                let addr = self.curr_mb_addr;
                self.entropy
                    .read_residual_block(
                        &mut mb.luma_level_8x8[i8x8],
                        ResidualBlock::LumaLevel8x8 { blk_idx: i8x8 },
                    )
                    .map_err(|e| SliceDataError::at(addr, e))?;
            }
        }

        if self.pps.sps.chroma_array_type() != 0 {
            let num_c8x8 = self.pps.sps.num_c8x8();
            for plane in 0..2 {
                if cbp_chroma & 3 != 0 {
                    let addr = self.curr_mb_addr;
                    self.entropy
                        .read_residual_block(
                            &mut mb.chroma_dc_level[plane][..4 * num_c8x8],
                            ResidualBlock::ChromaDcLevel { plane },
                        )
                        .map_err(|e| SliceDataError::at(addr, e))?;
                }
            }
            for plane in 0..2 {
                for i8x8 in 0..num_c8x8 {
                    for i4x4 in 0..4 {
                        let blk_idx = i8x8 * 4 + i4x4;
                        if cbp_chroma & 2 != 0 {
                            let addr = self.curr_mb_addr;
                            self.entropy
                                .read_residual_block(
                                    &mut mb.chroma_ac_level[plane][blk_idx],
                                    ResidualBlock::ChromaAcLevel { plane, blk_idx },
                                )
                                .map_err(|e| SliceDataError::at(addr, e))?;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// One explicit 3-bit intra prediction mode.
    fn intra_pred_mode(&mut self, elem: SyntaxElement) -> Result<u8, SliceDataError> {
        let mode = self.element(|e| e.read_bits(elem, 3))?;
        if mode > 7 {
            return Err(self.error(SyntaxError::malformed(
                elem,
                format!("mode {} out of range", mode),
            )));
        }
        Ok(mode as u8)
    }

    /// The largest legal `ref_idx_lX` values for the current macroblock,
    /// clause 7.4.5.1: doubled ranges apply to field-decoded macroblocks of
    /// an MBAFF frame.
    fn ref_idx_bounds(&self, mb: &Macroblock) -> (u32, u32) {
        let double = self.mbaff_frame_flag && mb.mb_field_decoding_flag;
        let bound = |num_active_minus1: u8| {
            if double {
                2 * u32::from(num_active_minus1) + 1
            } else {
                u32::from(num_active_minus1)
            }
        };
        (
            bound(self.header.num_ref_idx_l0_active_minus1),
            bound(self.header.num_ref_idx_l1_active_minus1),
        )
    }

    fn element<T>(
        &mut self,
        read: impl FnOnce(&mut E) -> Result<T, SyntaxError>,
    ) -> Result<T, SliceDataError> {
        let addr = self.curr_mb_addr;
        read(&mut self.entropy).map_err(|e| SliceDataError::at(addr, e))
    }

    fn error(&self, source: SyntaxError) -> SliceDataError {
        SliceDataError::at(self.curr_mb_addr, source)
    }
}
