//! App handle space.
//!
//! Handles below [`NEGOTIATED_START`] are reserved for predefined services.
//! Handles from [`NEGOTIATED_START`] up are assigned to registered services in
//! registration order.

/// Out-of-band / system datagrams.
pub const NONE: u8 = 0;

/// Echo service.
pub const LOOPBACK: u8 = 1;

/// Service enumeration.
pub const DISCOVERY: u8 = 2;

/// Wall-clock exchange.
pub const TIMESYNC: u8 = 3;

/// First handle assigned at registration time.
pub const NEGOTIATED_START: u8 = 0x10;

/// Number of negotiated handles.
pub const MAX_NEGOTIATED: usize = (u8::MAX - NEGOTIATED_START) as usize + 1;

/// Returns a human-readable name for a handle.
pub fn handle_name(handle: u8) -> &'static str {
    match handle {
        NONE => "none",
        LOOPBACK => "loopback",
        DISCOVERY => "discovery",
        TIMESYNC => "timesync",
        4..NEGOTIATED_START => "reserved",
        _ => "negotiated",
    }
}

/// Returns true for handles addressing a predefined service.
pub fn is_predefined(handle: u8) -> bool {
    (LOOPBACK..NEGOTIATED_START).contains(&handle)
}

/// Registration-table index addressed by a negotiated handle.
pub fn negotiated_index(handle: u8) -> Option<usize> {
    handle
        .checked_sub(NEGOTIATED_START)
        .map(|index| index as usize)
}

/// Handle assigned to the registration at `index`.
pub fn negotiated_handle(index: usize) -> Option<u8> {
    if index < MAX_NEGOTIATED {
        Some(NEGOTIATED_START + index as u8)
    } else {
        None
    }
}
