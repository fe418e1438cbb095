//! UPnP/DLNA helpers for media servers on the local network.

pub mod feature_list;
