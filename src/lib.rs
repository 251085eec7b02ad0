// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Slice-data and macroblock syntax parsing for H.264 (ITU-T Rec. H.264 /
//! ISO/IEC 14496-10).
//!
//! This crate decodes the per-macroblock syntax of a video slice: macroblock
//! types, PCM payloads, intra and inter prediction signaling, coded block
//! patterns and transform-coefficient residuals, under either of the two
//! entropy coding schemes the standard defines (CAVLC and CABAC). The output
//! is a sequence of fully populated [`codec::h264::macroblock::Macroblock`]
//! records, ready to be handed to pixel-domain reconstruction.
//!
//! NAL demultiplexing, SPS/PPS/slice-header parsing and pixel reconstruction
//! are out of scope; the slice-data-relevant parameter fields are consumed
//! through the slim records in [`codec::h264::params`]. The CAVLC code tables
//! and the CABAC arithmetic engine of clause 9 are consumed through the
//! collaborator traits in [`codec::h264::entropy`].

pub mod codec;
