// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Macroblock and sub-macroblock type tables.
//!
//! These reproduce tables 7-11 through 7-18 in the specification: the mapping
//! from the coded `mb_type`/`sub_mb_type` value to the macroblock type, its
//! partition count and the per-partition prediction modes. The data is fixed
//! by the specification and must not be derived at runtime.

use crate::codec::h264::params::SliceType;

/// Macroblock partition prediction modes, as listed in tables 7-11 to 7-14 in
/// the specification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredMode {
    Intra4x4,
    Intra8x8,
    Intra16x16,
    PredL0,
    PredL1,
    BiPred,
    Direct,
}

impl PredMode {
    /// Whether this mode is one of the intra prediction modes.
    pub fn is_intra(&self) -> bool {
        matches!(
            self,
            PredMode::Intra4x4 | PredMode::Intra8x8 | PredMode::Intra16x16
        )
    }
}

/// A decoded macroblock type.
///
/// The 24 `I_16x16` types collapse into a single variant carrying the
/// quantities Table 7-11 derives from the type code: the intra 16x16
/// prediction mode and both coded-block-pattern halves, which are not
/// signaled separately for these types.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MbType {
    INxN,
    I16x16 {
        pred_mode: u8,
        cbp_chroma: u8,
        cbp_luma: u8,
    },
    IPcm,
    Si,
    PL016x16,
    PL0L016x8,
    PL0L08x16,
    P8x8,
    P8x8Ref0,
    BDirect16x16,
    BL016x16,
    BL116x16,
    BBi16x16,
    BL0L016x8,
    BL0L08x16,
    BL1L116x8,
    BL1L18x16,
    BL0L116x8,
    BL0L18x16,
    BL1L016x8,
    BL1L08x16,
    BL0Bi16x8,
    BL0Bi8x16,
    BL1Bi16x8,
    BL1Bi8x16,
    BBiL016x8,
    BBiL08x16,
    BBiL116x8,
    BBiL18x16,
    BBiBi16x8,
    BBiBi8x16,
    B8x8,
}

/// Table 7-11: the I-slice `mb_type` code space.
fn intra_from_code(code: u32) -> Option<MbType> {
    match code {
        0 => Some(MbType::INxN),
        1..=24 => {
            let k = code - 1;
            Some(MbType::I16x16 {
                pred_mode: (k % 4) as u8,
                cbp_chroma: ((k / 4) % 3) as u8,
                cbp_luma: if k < 12 { 0 } else { 15 },
            })
        }
        25 => Some(MbType::IPcm),
        _ => None,
    }
}

/// Table 7-13: the P/SP-slice `mb_type` code space. Codes 5 and up escape
/// into the intra table.
fn p_from_code(code: u32) -> Option<MbType> {
    match code {
        0 => Some(MbType::PL016x16),
        1 => Some(MbType::PL0L016x8),
        2 => Some(MbType::PL0L08x16),
        3 => Some(MbType::P8x8),
        4 => Some(MbType::P8x8Ref0),
        _ => intra_from_code(code - 5),
    }
}

/// Table 7-14: the B-slice `mb_type` code space. Codes 23 and up escape into
/// the intra table.
fn b_from_code(code: u32) -> Option<MbType> {
    match code {
        0 => Some(MbType::BDirect16x16),
        1 => Some(MbType::BL016x16),
        2 => Some(MbType::BL116x16),
        3 => Some(MbType::BBi16x16),
        4 => Some(MbType::BL0L016x8),
        5 => Some(MbType::BL0L08x16),
        6 => Some(MbType::BL1L116x8),
        7 => Some(MbType::BL1L18x16),
        8 => Some(MbType::BL0L116x8),
        9 => Some(MbType::BL0L18x16),
        10 => Some(MbType::BL1L016x8),
        11 => Some(MbType::BL1L08x16),
        12 => Some(MbType::BL0Bi16x8),
        13 => Some(MbType::BL0Bi8x16),
        14 => Some(MbType::BL1Bi16x8),
        15 => Some(MbType::BL1Bi8x16),
        16 => Some(MbType::BBiL016x8),
        17 => Some(MbType::BBiL08x16),
        18 => Some(MbType::BBiL116x8),
        19 => Some(MbType::BBiL18x16),
        20 => Some(MbType::BBiBi16x8),
        21 => Some(MbType::BBiBi8x16),
        22 => Some(MbType::B8x8),
        _ => intra_from_code(code - 23),
    }
}

impl MbType {
    /// Maps a coded `mb_type` value to its macroblock type within the code
    /// space of `slice_type`. Returns `None` for values with no table entry.
    pub fn from_code(slice_type: SliceType, code: u32) -> Option<MbType> {
        match slice_type {
            SliceType::I => intra_from_code(code),
            SliceType::Si => match code {
                0 => Some(MbType::Si),
                _ => intra_from_code(code - 1),
            },
            SliceType::P | SliceType::Sp => p_from_code(code),
            SliceType::B => b_from_code(code),
        }
    }

    /// `NumMbPart`, tables 7-13 and 7-14.
    pub fn num_mb_part(&self) -> usize {
        match self {
            MbType::PL016x16 | MbType::BL016x16 | MbType::BL116x16 | MbType::BBi16x16 => 1,
            MbType::P8x8 | MbType::P8x8Ref0 | MbType::B8x8 => 4,
            MbType::PL0L016x8
            | MbType::PL0L08x16
            | MbType::BL0L016x8
            | MbType::BL0L08x16
            | MbType::BL1L116x8
            | MbType::BL1L18x16
            | MbType::BL0L116x8
            | MbType::BL0L18x16
            | MbType::BL1L016x8
            | MbType::BL1L08x16
            | MbType::BL0Bi16x8
            | MbType::BL0Bi8x16
            | MbType::BL1Bi16x8
            | MbType::BL1Bi8x16
            | MbType::BBiL016x8
            | MbType::BBiL08x16
            | MbType::BBiL116x8
            | MbType::BBiL18x16
            | MbType::BBiBi16x8
            | MbType::BBiBi8x16 => 2,
            // Not applicable to intra and direct macroblocks; their layer
            // decode never iterates partitions.
            _ => 1,
        }
    }

    /// `MbPartPredMode`, tables 7-11 to 7-14. For `I_NxN` the mode depends on
    /// `transform_size_8x8_flag`.
    pub fn mb_part_pred_mode(&self, part_idx: usize, transform_size_8x8_flag: bool) -> PredMode {
        match (self, part_idx) {
            (MbType::INxN, _) => {
                if transform_size_8x8_flag {
                    PredMode::Intra8x8
                } else {
                    PredMode::Intra4x4
                }
            }
            (MbType::Si, _) => PredMode::Intra4x4,
            (MbType::I16x16 { .. } | MbType::IPcm, _) => PredMode::Intra16x16,
            (MbType::BDirect16x16, _) => PredMode::Direct,
            (
                MbType::PL016x16
                | MbType::PL0L016x8
                | MbType::PL0L08x16
                | MbType::P8x8
                | MbType::P8x8Ref0,
                _,
            ) => PredMode::PredL0,
            (MbType::BL016x16, _) | (MbType::B8x8, _) => PredMode::PredL0,
            (MbType::BL116x16, _) => PredMode::PredL1,
            (MbType::BBi16x16, _) => PredMode::BiPred,
            (MbType::BL0L016x8 | MbType::BL0L08x16, _) => PredMode::PredL0,
            (MbType::BL1L116x8 | MbType::BL1L18x16, _) => PredMode::PredL1,
            (MbType::BL0L116x8 | MbType::BL0L18x16, 0) => PredMode::PredL0,
            (MbType::BL0L116x8 | MbType::BL0L18x16, _) => PredMode::PredL1,
            (MbType::BL1L016x8 | MbType::BL1L08x16, 0) => PredMode::PredL1,
            (MbType::BL1L016x8 | MbType::BL1L08x16, _) => PredMode::PredL0,
            (MbType::BL0Bi16x8 | MbType::BL0Bi8x16, 0) => PredMode::PredL0,
            (MbType::BL0Bi16x8 | MbType::BL0Bi8x16, _) => PredMode::BiPred,
            (MbType::BL1Bi16x8 | MbType::BL1Bi8x16, 0) => PredMode::PredL1,
            (MbType::BL1Bi16x8 | MbType::BL1Bi8x16, _) => PredMode::BiPred,
            (MbType::BBiL016x8 | MbType::BBiL08x16, 0) => PredMode::BiPred,
            (MbType::BBiL016x8 | MbType::BBiL08x16, _) => PredMode::PredL0,
            (MbType::BBiL116x8 | MbType::BBiL18x16, 0) => PredMode::BiPred,
            (MbType::BBiL116x8 | MbType::BBiL18x16, _) => PredMode::PredL1,
            (MbType::BBiBi16x8 | MbType::BBiBi8x16, _) => PredMode::BiPred,
        }
    }

    /// Whether this is one of the intra macroblock types.
    pub fn is_intra(&self) -> bool {
        matches!(
            self,
            MbType::INxN | MbType::I16x16 { .. } | MbType::IPcm | MbType::Si
        )
    }

    /// The coded block pattern Table 7-11 derives from an `I_16x16` type
    /// code. `None` for all other types, whose pattern is coded explicitly.
    pub fn derived_coded_block_pattern(&self) -> Option<u32> {
        match self {
            MbType::I16x16 {
                cbp_chroma,
                cbp_luma,
                ..
            } => Some((u32::from(*cbp_chroma) << 4) | u32::from(*cbp_luma)),
            _ => None,
        }
    }
}

/// A decoded sub-macroblock type, tables 7-17 and 7-18.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubMbType {
    PL08x8,
    PL08x4,
    PL04x8,
    PL04x4,
    BDirect8x8,
    BL08x8,
    BL18x8,
    BBi8x8,
    BL08x4,
    BL04x8,
    BL18x4,
    BL14x8,
    BBi8x4,
    BBi4x8,
    BL04x4,
    BL14x4,
    BBi4x4,
}

impl SubMbType {
    /// Maps a coded `sub_mb_type` value to its sub-macroblock type within
    /// the code space of `slice_type`. Returns `None` for values with no
    /// table entry.
    pub fn from_code(slice_type: SliceType, code: u32) -> Option<SubMbType> {
        match slice_type {
            SliceType::P | SliceType::Sp => match code {
                0 => Some(SubMbType::PL08x8),
                1 => Some(SubMbType::PL08x4),
                2 => Some(SubMbType::PL04x8),
                3 => Some(SubMbType::PL04x4),
                _ => None,
            },
            SliceType::B => match code {
                0 => Some(SubMbType::BDirect8x8),
                1 => Some(SubMbType::BL08x8),
                2 => Some(SubMbType::BL18x8),
                3 => Some(SubMbType::BBi8x8),
                4 => Some(SubMbType::BL08x4),
                5 => Some(SubMbType::BL04x8),
                6 => Some(SubMbType::BL18x4),
                7 => Some(SubMbType::BL14x8),
                8 => Some(SubMbType::BBi8x4),
                9 => Some(SubMbType::BBi4x8),
                10 => Some(SubMbType::BL04x4),
                11 => Some(SubMbType::BL14x4),
                12 => Some(SubMbType::BBi4x4),
                _ => None,
            },
            // I and SI slices carry no sub-macroblock predictions.
            SliceType::I | SliceType::Si => None,
        }
    }

    /// `NumSubMbPart`, tables 7-17 and 7-18.
    pub fn num_sub_mb_part(&self) -> usize {
        match self {
            SubMbType::PL08x8 | SubMbType::BL08x8 | SubMbType::BL18x8 | SubMbType::BBi8x8 => 1,
            SubMbType::PL08x4
            | SubMbType::PL04x8
            | SubMbType::BL08x4
            | SubMbType::BL04x8
            | SubMbType::BL18x4
            | SubMbType::BL14x8
            | SubMbType::BBi8x4
            | SubMbType::BBi4x8 => 2,
            SubMbType::PL04x4
            | SubMbType::BDirect8x8
            | SubMbType::BL04x4
            | SubMbType::BL14x4
            | SubMbType::BBi4x4 => 4,
        }
    }

    /// `SubMbPredMode`, tables 7-17 and 7-18.
    pub fn sub_mb_pred_mode(&self) -> PredMode {
        match self {
            SubMbType::BDirect8x8 => PredMode::Direct,
            SubMbType::PL08x8
            | SubMbType::PL08x4
            | SubMbType::PL04x8
            | SubMbType::PL04x4
            | SubMbType::BL08x8
            | SubMbType::BL08x4
            | SubMbType::BL04x8
            | SubMbType::BL04x4 => PredMode::PredL0,
            SubMbType::BL18x8 | SubMbType::BL18x4 | SubMbType::BL14x8 | SubMbType::BL14x4 => {
                PredMode::PredL1
            }
            SubMbType::BBi8x8 | SubMbType::BBi8x4 | SubMbType::BBi4x8 | SubMbType::BBi4x4 => {
                PredMode::BiPred
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intra_code_space() {
        assert_eq!(MbType::from_code(SliceType::I, 0), Some(MbType::INxN));
        assert_eq!(
            MbType::from_code(SliceType::I, 1),
            Some(MbType::I16x16 {
                pred_mode: 0,
                cbp_chroma: 0,
                cbp_luma: 0
            })
        );
        assert_eq!(
            MbType::from_code(SliceType::I, 6),
            Some(MbType::I16x16 {
                pred_mode: 1,
                cbp_chroma: 1,
                cbp_luma: 0
            })
        );
        assert_eq!(
            MbType::from_code(SliceType::I, 24),
            Some(MbType::I16x16 {
                pred_mode: 3,
                cbp_chroma: 2,
                cbp_luma: 15
            })
        );
        assert_eq!(MbType::from_code(SliceType::I, 25), Some(MbType::IPcm));
        assert_eq!(MbType::from_code(SliceType::I, 26), None);
    }

    #[test]
    fn derived_coded_block_pattern() {
        let mb_type = MbType::from_code(SliceType::I, 17).unwrap();
        // Code 17 is I_16x16_0_1_1: luma pattern 15, chroma pattern 1.
        assert_eq!(mb_type.derived_coded_block_pattern(), Some(0x1f));
        assert_eq!(MbType::INxN.derived_coded_block_pattern(), None);
    }

    #[test]
    fn p_code_space_escapes_to_intra() {
        assert_eq!(MbType::from_code(SliceType::P, 0), Some(MbType::PL016x16));
        assert_eq!(MbType::from_code(SliceType::P, 3), Some(MbType::P8x8));
        assert_eq!(MbType::from_code(SliceType::P, 4), Some(MbType::P8x8Ref0));
        assert_eq!(MbType::from_code(SliceType::P, 5), Some(MbType::INxN));
        assert_eq!(MbType::from_code(SliceType::Sp, 30), Some(MbType::IPcm));
        assert_eq!(MbType::from_code(SliceType::P, 31), None);
    }

    #[test]
    fn b_code_space_escapes_to_intra() {
        assert_eq!(
            MbType::from_code(SliceType::B, 0),
            Some(MbType::BDirect16x16)
        );
        assert_eq!(MbType::from_code(SliceType::B, 22), Some(MbType::B8x8));
        assert_eq!(MbType::from_code(SliceType::B, 23), Some(MbType::INxN));
        assert_eq!(MbType::from_code(SliceType::B, 48), Some(MbType::IPcm));
        assert_eq!(MbType::from_code(SliceType::B, 49), None);
    }

    #[test]
    fn partition_counts() {
        assert_eq!(MbType::PL016x16.num_mb_part(), 1);
        assert_eq!(MbType::PL0L016x8.num_mb_part(), 2);
        assert_eq!(MbType::P8x8.num_mb_part(), 4);
        assert_eq!(MbType::BBi16x16.num_mb_part(), 1);
        assert_eq!(MbType::BL1L08x16.num_mb_part(), 2);
        assert_eq!(MbType::B8x8.num_mb_part(), 4);
    }

    #[test]
    fn part_pred_modes() {
        assert_eq!(
            MbType::INxN.mb_part_pred_mode(0, false),
            PredMode::Intra4x4
        );
        assert_eq!(MbType::INxN.mb_part_pred_mode(0, true), PredMode::Intra8x8);
        assert_eq!(
            MbType::from_code(SliceType::I, 12)
                .unwrap()
                .mb_part_pred_mode(0, false),
            PredMode::Intra16x16
        );
        assert_eq!(
            MbType::BL1L016x8.mb_part_pred_mode(0, false),
            PredMode::PredL1
        );
        assert_eq!(
            MbType::BL1L016x8.mb_part_pred_mode(1, false),
            PredMode::PredL0
        );
        assert_eq!(
            MbType::BL0Bi8x16.mb_part_pred_mode(1, false),
            PredMode::BiPred
        );
        assert_eq!(
            MbType::BDirect16x16.mb_part_pred_mode(0, false),
            PredMode::Direct
        );
    }

    #[test]
    fn sub_mb_tables() {
        assert_eq!(
            SubMbType::from_code(SliceType::P, 0),
            Some(SubMbType::PL08x8)
        );
        assert_eq!(SubMbType::from_code(SliceType::P, 4), None);
        assert_eq!(
            SubMbType::from_code(SliceType::B, 0),
            Some(SubMbType::BDirect8x8)
        );
        assert_eq!(
            SubMbType::from_code(SliceType::B, 12),
            Some(SubMbType::BBi4x4)
        );
        assert_eq!(SubMbType::from_code(SliceType::B, 13), None);

        assert_eq!(SubMbType::PL08x8.num_sub_mb_part(), 1);
        assert_eq!(SubMbType::PL08x4.num_sub_mb_part(), 2);
        assert_eq!(SubMbType::PL04x4.num_sub_mb_part(), 4);
        assert_eq!(SubMbType::BDirect8x8.num_sub_mb_part(), 4);
        assert_eq!(SubMbType::BBi8x4.num_sub_mb_part(), 2);

        assert_eq!(SubMbType::BL18x4.sub_mb_pred_mode(), PredMode::PredL1);
        assert_eq!(SubMbType::BBi4x8.sub_mb_pred_mode(), PredMode::BiPred);
        assert_eq!(SubMbType::BDirect8x8.sub_mb_pred_mode(), PredMode::Direct);
    }
}
