#![no_main]

use amqp_transport::{common_name_matches, socket::MAX_COMMON_NAME_LEN};
use libfuzzer_sys::arbitrary::{Arbitrary, Unstructured};
use libfuzzer_sys::fuzz_target;

#[derive(Debug)]
struct NameInput {
    host: String,
    common_name: Vec<u8>,
}

impl<'a> Arbitrary<'a> for NameInput {
    fn arbitrary(u: &mut Unstructured<'a>) -> libfuzzer_sys::arbitrary::Result<Self> {
        let host: String = u.arbitrary()?;
        let common_name: Vec<u8> = u.arbitrary()?;
        Ok(Self { host, common_name })
    }
}

fuzz_target!(|input: NameInput| {
    let matched = common_name_matches(&input.host, &input.common_name);

    if matched {
        let end = input
            .common_name
            .iter()
            .rposition(|&b| b != 0)
            .map_or(0, |i| i + 1);
        let name = &input.common_name[..end];
        assert!(name.len() < MAX_COMMON_NAME_LEN);
        assert!(!name.iter().any(u8::is_ascii_control));
        assert!(name.eq_ignore_ascii_case(input.host.as_bytes()));
    }
});
