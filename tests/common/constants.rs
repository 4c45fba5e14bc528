//! Records shared by the end-to-end tests.

#![allow(dead_code)]

pub const CHIM_SONG_ID: &str = "SOXVLOJ12AB0189215";
pub const CHIM_TITLE: &str = "Chim Chim Cheree";
pub const CHIM_DURATION: f64 = 192.576;
pub const TRENIERS_ID: &str = "ARTC1LV1187B9A4858";
pub const TRENIERS_NAME: &str = "The Treniers";

pub const MERCY_SONG_ID: &str = "SOBLFFE12AF72AA5BA";
pub const MERCY_TITLE: &str = "Mercy:The Laundromat";
pub const MERCY_DURATION: f64 = 99.16036;
pub const PAVEMENT_ID: &str = "ARMJAGH1187FB546F3";
pub const PAVEMENT_NAME: &str = "Pavement";

/// 2018-11-12T02:37:38.796Z
pub const TS_NOV_12: i64 = 1541990258796;
pub const TS_NOV_12_LATER: i64 = 1541990400000;
/// 2018-11-15T16:00:00Z
pub const TS_NOV_15: i64 = 1542297600000;

pub const USER_KATE: i64 = 97;
pub const USER_SYLVIE: i64 = 10;
