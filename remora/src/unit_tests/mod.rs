// Copyright (c) The remora Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

mod build_info_tests;
mod fixtures;
