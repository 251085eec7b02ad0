// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod cabac;
pub mod cavlc;
pub mod entropy;
pub mod macroblock;
pub mod mb_type;
pub mod nalu_reader;
pub mod params;
pub mod slice_data;
