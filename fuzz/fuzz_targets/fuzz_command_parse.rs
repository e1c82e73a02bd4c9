#![no_main]
use libfuzzer_sys::fuzz_target;
use summonbot::auto_reply::{CommandParser, PrefixCommandParser};

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        let parser = PrefixCommandParser::new("!");
        if let Some(parsed) = parser.parse(s) {
            assert!(!parsed.name.is_empty());
            assert!(!parsed.name.chars().any(char::is_whitespace));
        }
        let _ = summonbot::auto_reply::mention_user_id(s);
    }
});
