//! The platform constant table: which integer ids exist, their names, and
//! the coarse classes the multi-terminal login policy groups them into.

pub const IOS: i32 = 1;
pub const ANDROID: i32 = 2;
pub const WINDOWS: i32 = 3;
pub const OSX: i32 = 4;
pub const WEB: i32 = 5;
pub const MINI_WEB: i32 = 6;
pub const LINUX: i32 = 7;
pub const ANDROID_PAD: i32 = 8;
pub const IPAD: i32 = 9;
pub const ADMIN: i32 = 10;

/// Platforms for which a delivered realtime frame makes offline push
/// redundant.
pub const MOBILE_PUSH_CAPABLE: &[i32] = &[IOS, ANDROID];

/// Coarse grouping of platforms, used by the `same-class-kick` and
/// `pc-allows-others` login policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformClass {
    Mobile,
    Pc,
    Pad,
    Web,
    Admin,
    Unknown,
}

pub fn class_of(platform_id: i32) -> PlatformClass {
    match platform_id {
        IOS | ANDROID => PlatformClass::Mobile,
        WINDOWS | OSX | LINUX => PlatformClass::Pc,
        ANDROID_PAD | IPAD => PlatformClass::Pad,
        WEB | MINI_WEB => PlatformClass::Web,
        ADMIN => PlatformClass::Admin,
        _ => PlatformClass::Unknown,
    }
}

pub fn name(platform_id: i32) -> &'static str {
    match platform_id {
        IOS => "iOS",
        ANDROID => "Android",
        WINDOWS => "Windows",
        OSX => "OSX",
        WEB => "Web",
        MINI_WEB => "MiniWeb",
        LINUX => "Linux",
        ANDROID_PAD => "AndroidPad",
        IPAD => "iPad",
        ADMIN => "Admin",
        _ => "Unknown",
    }
}

pub fn is_mobile_push_capable(platform_id: i32) -> bool {
    MOBILE_PUSH_CAPABLE.contains(&platform_id)
}
