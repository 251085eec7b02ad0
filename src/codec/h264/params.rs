// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The subset of the H.264 parameter sets and slice header that slice-data
//! decoding consumes. Parsing these structures out of SPS/PPS/slice-header
//! NAL units is a separate concern and not handled here.

use std::rc::Rc;

use enumn::N;

/// The slice-data-relevant fields of a sequence parameter set.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Sps {
    /// Specifies the chroma sampling relative to the luma sampling as
    /// specified in clause 6.2.
    pub chroma_format_idc: u8,

    /// Specifies whether the three colour components of the 4:4:4 chroma
    /// format are coded separately.
    pub separate_colour_plane_flag: bool,

    /// Specifies the method used in the derivation process for luma motion
    /// vectors for B_Skip, B_Direct_16x16 and B_Direct_8x8 as specified in
    /// clause 8.4.1.2.
    pub direct_8x8_inference_flag: bool,

    /// If true, specifies that every coded picture of the coded video
    /// sequence is a coded frame containing only frame macroblocks.
    pub frame_mbs_only_flag: bool,

    /// If true, specifies the possible use of switching between frame and
    /// field macroblocks within frames.
    pub mb_adaptive_frame_field_flag: bool,

    /// Plus 1 specifies the width of each decoded picture in units of
    /// macroblocks.
    pub pic_width_in_mbs_minus1: u16,

    /// Plus 1 specifies the height in slice group map units of a decoded
    /// frame or field.
    pub pic_height_in_map_units_minus1: u16,
}

impl Sps {
    /// Returns `ChromaArrayType`, as computed in the specification.
    pub const fn chroma_array_type(&self) -> u8 {
        match self.separate_colour_plane_flag {
            false => self.chroma_format_idc,
            true => 0,
        }
    }

    /// Returns `SubWidthC` and `SubHeightC`.
    ///
    /// See table 6-1 in the specification.
    const fn sub_width_height_c(&self) -> (u32, u32) {
        match (self.chroma_format_idc, self.separate_colour_plane_flag) {
            (1, false) => (2, 2),
            (2, false) => (2, 1),
            (3, false) => (1, 1),
            // undefined.
            _ => (1, 1),
        }
    }

    /// Returns `MbWidthC` and `MbHeightC`, the chroma dimensions of a
    /// macroblock. Zero for monochrome and separate-colour-plane streams.
    ///
    /// See 6-2 and 6-3 in the specification.
    pub const fn mb_width_height_c(&self) -> (u32, u32) {
        if self.chroma_array_type() == 0 {
            (0, 0)
        } else {
            let (sub_width_c, sub_height_c) = self.sub_width_height_c();
            (16 / sub_width_c, 16 / sub_height_c)
        }
    }

    /// Returns `NumC8x8`, the number of chroma 8x8 blocks per plane in a
    /// macroblock. Only meaningful when chroma residuals are present.
    pub const fn num_c8x8(&self) -> usize {
        let (sub_width_c, sub_height_c) = self.sub_width_height_c();
        (4 / (sub_width_c * sub_height_c)) as usize
    }

    /// `PicSizeInMbs` for a slice of this sequence, the bound on macroblock
    /// addresses. See 7-26 through 7-29 in the specification.
    pub fn pic_size_in_mbs(&self, field_pic_flag: bool) -> u32 {
        let pic_width_in_mbs = u32::from(self.pic_width_in_mbs_minus1) + 1;
        let frame_height_in_mbs = (2 - u32::from(self.frame_mbs_only_flag))
            * (u32::from(self.pic_height_in_map_units_minus1) + 1);
        pic_width_in_mbs * (frame_height_in_mbs / (1 + u32::from(field_pic_flag)))
    }
}

pub struct SpsBuilder(Sps);

impl Default for SpsBuilder {
    fn default() -> Self {
        // 4:2:0, frame coding: the dominant configuration.
        SpsBuilder(Sps {
            chroma_format_idc: 1,
            separate_colour_plane_flag: false,
            direct_8x8_inference_flag: true,
            frame_mbs_only_flag: true,
            mb_adaptive_frame_field_flag: false,
            pic_width_in_mbs_minus1: 0,
            pic_height_in_map_units_minus1: 0,
        })
    }
}

impl SpsBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn chroma_format_idc(mut self, value: u8) -> Self {
        self.0.chroma_format_idc = value;
        self
    }

    pub fn separate_colour_plane_flag(mut self, value: bool) -> Self {
        self.0.separate_colour_plane_flag = value;
        self
    }

    pub fn direct_8x8_inference_flag(mut self, value: bool) -> Self {
        self.0.direct_8x8_inference_flag = value;
        self
    }

    pub fn frame_mbs_only_flag(mut self, value: bool) -> Self {
        self.0.frame_mbs_only_flag = value;
        self
    }

    pub fn mb_adaptive_frame_field_flag(mut self, value: bool) -> Self {
        self = self.frame_mbs_only_flag(false);
        self.0.mb_adaptive_frame_field_flag = value;
        self
    }

    pub fn pic_width_in_mbs(mut self, value: u16) -> Self {
        self.0.pic_width_in_mbs_minus1 = value - 1;
        self
    }

    pub fn pic_height_in_map_units(mut self, value: u16) -> Self {
        self.0.pic_height_in_map_units_minus1 = value - 1;
        self
    }

    pub fn build(self) -> Rc<Sps> {
        Rc::new(self.0)
    }
}

/// The slice-data-relevant fields of a picture parameter set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pps {
    /// Selects the entropy decoding method to be applied to the slice data:
    /// CAVLC and Exp-Golomb codes when unset, CABAC when set.
    pub entropy_coding_mode_flag: bool,

    /// If set, specifies that the 8x8 transform decoding process may be in
    /// use (see clause 8.5).
    pub transform_8x8_mode_flag: bool,

    /// Specifies how `num_ref_idx_l0_active_minus1` is inferred for P, SP,
    /// and B slices with `num_ref_idx_active_override_flag` not set.
    pub num_ref_idx_l0_default_active_minus1: u8,

    /// Specifies how `num_ref_idx_l1_active_minus1` is inferred for B slices
    /// with `num_ref_idx_active_override_flag` not set.
    pub num_ref_idx_l1_default_active_minus1: u8,

    /// The SPS referenced by this PPS.
    pub sps: Rc<Sps>,
}

pub struct PpsBuilder(Pps);

impl PpsBuilder {
    pub fn new(sps: Rc<Sps>) -> Self {
        PpsBuilder(Pps {
            entropy_coding_mode_flag: false,
            transform_8x8_mode_flag: false,
            num_ref_idx_l0_default_active_minus1: 0,
            num_ref_idx_l1_default_active_minus1: 0,
            sps,
        })
    }

    pub fn entropy_coding_mode_flag(mut self, value: bool) -> Self {
        self.0.entropy_coding_mode_flag = value;
        self
    }

    pub fn transform_8x8_mode_flag(mut self, value: bool) -> Self {
        self.0.transform_8x8_mode_flag = value;
        self
    }

    pub fn num_ref_idx_l0_default_active_minus1(mut self, value: u8) -> Self {
        self.0.num_ref_idx_l0_default_active_minus1 = value;
        self
    }

    pub fn num_ref_idx_l1_default_active_minus1(mut self, value: u8) -> Self {
        self.0.num_ref_idx_l1_default_active_minus1 = value;
        self
    }

    pub fn build(self) -> Rc<Pps> {
        Rc::new(self.0)
    }
}

#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
/// See table 7-6 in the specification.
pub enum SliceType {
    P = 0,
    B = 1,
    I = 2,
    Sp = 3,
    Si = 4,
}

impl SliceType {
    /// Whether this is a P slice. See table 7-6 in the specification.
    pub fn is_p(&self) -> bool {
        matches!(self, SliceType::P)
    }

    /// Whether this is a B slice. See table 7-6 in the specification.
    pub fn is_b(&self) -> bool {
        matches!(self, SliceType::B)
    }

    /// Whether this is an I slice. See table 7-6 in the specification.
    pub fn is_i(&self) -> bool {
        matches!(self, SliceType::I)
    }

    /// Whether this is a SP slice. See table 7-6 in the specification.
    pub fn is_sp(&self) -> bool {
        matches!(self, SliceType::Sp)
    }

    /// Whether this is a SI slice. See table 7-6 in the specification.
    pub fn is_si(&self) -> bool {
        matches!(self, SliceType::Si)
    }

    /// Whether macroblocks of this slice may be skipped, i.e. whether
    /// `mb_skip_run`/`mb_skip_flag` is present in the slice data.
    pub fn has_skip_signaling(&self) -> bool {
        !self.is_i() && !self.is_si()
    }
}

impl Default for SliceType {
    fn default() -> Self {
        Self::P
    }
}

/// The slice-data-relevant fields of a slice header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SliceHeader {
    /// Specifies the address of the first macroblock in the slice.
    pub first_mb_in_slice: u32,

    /// Specifies the coding type of the slice according to Table 7-6.
    pub slice_type: SliceType,

    /// If set, specifies that the slice is a slice of a coded field.
    pub field_pic_flag: bool,

    /// Specifies the maximum reference index for reference picture list 0
    /// that shall be used to decode the slice.
    pub num_ref_idx_l0_active_minus1: u8,

    /// Specifies the maximum reference index for reference picture list 1
    /// that shall be used to decode the slice.
    pub num_ref_idx_l1_active_minus1: u8,
}

impl SliceHeader {
    /// Same as MbaffFrameFlag. See 7-25 in the specification.
    pub fn mbaff_frame_flag(&self, sps: &Sps) -> bool {
        sps.mb_adaptive_frame_field_flag && !self.field_pic_flag
    }
}

pub struct SliceHeaderBuilder(SliceHeader);

impl SliceHeaderBuilder {
    pub fn new(pps: &Pps) -> Self {
        SliceHeaderBuilder(SliceHeader {
            num_ref_idx_l0_active_minus1: pps.num_ref_idx_l0_default_active_minus1,
            num_ref_idx_l1_active_minus1: pps.num_ref_idx_l1_default_active_minus1,
            ..Default::default()
        })
    }

    pub fn slice_type(mut self, type_: SliceType) -> Self {
        self.0.slice_type = type_;
        self
    }

    pub fn first_mb_in_slice(mut self, value: u32) -> Self {
        self.0.first_mb_in_slice = value;
        self
    }

    pub fn field_pic_flag(mut self, value: bool) -> Self {
        self.0.field_pic_flag = value;
        self
    }

    pub fn num_ref_idx_l0_active_minus1(mut self, value: u8) -> Self {
        self.0.num_ref_idx_l0_active_minus1 = value;
        self
    }

    pub fn num_ref_idx_l1_active_minus1(mut self, value: u8) -> Self {
        self.0.num_ref_idx_l1_active_minus1 = value;
        self
    }

    pub fn build(self) -> SliceHeader {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chroma_format_derivations() {
        // Monochrome.
        let sps = SpsBuilder::new().chroma_format_idc(0).build();
        assert_eq!(sps.chroma_array_type(), 0);
        assert_eq!(sps.mb_width_height_c(), (0, 0));

        // 4:2:0.
        let sps = SpsBuilder::new().build();
        assert_eq!(sps.chroma_array_type(), 1);
        assert_eq!(sps.mb_width_height_c(), (8, 8));
        assert_eq!(sps.num_c8x8(), 1);

        // 4:2:2.
        let sps = SpsBuilder::new().chroma_format_idc(2).build();
        assert_eq!(sps.mb_width_height_c(), (8, 16));
        assert_eq!(sps.num_c8x8(), 2);

        // 4:4:4.
        let sps = SpsBuilder::new().chroma_format_idc(3).build();
        assert_eq!(sps.mb_width_height_c(), (16, 16));
        assert_eq!(sps.num_c8x8(), 4);

        // 4:4:4 with separate colour planes decodes as monochrome.
        let sps = SpsBuilder::new()
            .chroma_format_idc(3)
            .separate_colour_plane_flag(true)
            .build();
        assert_eq!(sps.chroma_array_type(), 0);
        assert_eq!(sps.mb_width_height_c(), (0, 0));
    }

    #[test]
    fn pic_size_in_mbs() {
        let sps = SpsBuilder::new()
            .pic_width_in_mbs(11)
            .pic_height_in_map_units(9)
            .build();
        assert_eq!(sps.pic_size_in_mbs(false), 99);

        // Interlace-capable sequences count two macroblock rows per map unit.
        let sps = SpsBuilder::new()
            .mb_adaptive_frame_field_flag(true)
            .pic_width_in_mbs(2)
            .pic_height_in_map_units(3)
            .build();
        assert_eq!(sps.pic_size_in_mbs(false), 12);
        assert_eq!(sps.pic_size_in_mbs(true), 6);
    }

    #[test]
    fn mbaff_requires_frame_coding() {
        let sps = SpsBuilder::new().mb_adaptive_frame_field_flag(true).build();
        let pps = PpsBuilder::new(sps).build();

        let header = SliceHeaderBuilder::new(&pps).build();
        assert!(header.mbaff_frame_flag(&pps.sps));

        let header = SliceHeaderBuilder::new(&pps).field_pic_flag(true).build();
        assert!(!header.mbaff_frame_flag(&pps.sps));
    }
}
