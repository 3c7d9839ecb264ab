use std::time::Duration;
use unicode_general_category::{get_general_category, GeneralCategory};

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8080";

/// How long a correlated request waits for its response by default.
pub const DEFAULT_AWAIT_TIMEOUT: Duration = Duration::from_millis(10_000);

pub const USERNAME_MIN_CHARS: usize = 4;
pub const USERNAME_MAX_CHARS: usize = 32;

/// Longest chat message, in characters, the server relays by default.
pub const DEFAULT_MAX_CHAT_CHARS: usize = 128;

/// Chat palette. The wire carries the palette index, clients map it to RGB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ChatColor {
    Black = 0,
    White = 1,
    Red = 2,
    Green = 3,
    Blue = 4,
    Yellow = 5,
    Orange = 6,
    Purple = 7,
    Pink = 8,
    Cyan = 9,
    Gray = 10,
}

impl ChatColor {
    pub fn from_index(index: u8) -> Option<Self> {
        use ChatColor::*;
        [
            Black, White, Red, Green, Blue, Yellow, Orange, Purple, Pink, Cyan, Gray,
        ]
        .get(index as usize)
        .copied()
    }

    pub fn rgb(self) -> u32 {
        match self {
            ChatColor::Black => 0x202020,
            ChatColor::White => 0xf0f0f0,
            ChatColor::Red => 0xff6060,
            ChatColor::Green => 0x60ff60,
            ChatColor::Blue => 0x6060ff,
            ChatColor::Yellow => 0xffff60,
            ChatColor::Orange => 0xffb060,
            ChatColor::Purple => 0xff60ff,
            ChatColor::Pink => 0xffc0ff,
            ChatColor::Cyan => 0x60ffff,
            ChatColor::Gray => 0x909090,
        }
    }
}

/// Usernames are 4 to 32 characters with no control (Cc) or unassigned (Cn)
/// code points. Surrogates cannot occur in a Rust `str`.
pub fn is_valid_username(username: &str) -> bool {
    let count = username.chars().count();
    (USERNAME_MIN_CHARS..=USERNAME_MAX_CHARS).contains(&count)
        && !username.chars().any(|c| {
            matches!(
                get_general_category(c),
                GeneralCategory::Control | GeneralCategory::Unassigned
            )
        })
}
