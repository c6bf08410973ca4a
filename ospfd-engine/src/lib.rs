//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod area;
pub mod config;
pub mod debug;
pub mod error;
pub mod exchange;
pub mod flood;
pub mod frame;
pub mod instance;
pub mod interface;
pub mod lsdb;
pub mod neighbor;
pub mod packet;
pub mod route;
pub mod southbound;
pub mod spf;
pub mod tasks;
