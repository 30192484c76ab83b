pub fn assert_contains(haystack: &str, needle: &str) {
    assert!(
        haystack.contains(needle),
        "Expected to find '{needle}' in output, got: {haystack}"
    );
}

/// Assert that `first` appears on an earlier line than `second`.
pub fn assert_ordered(lines: &[String], first: &str, second: &str) {
    let pos = |needle: &str| {
        lines
            .iter()
            .position(|l| l.contains(needle))
            .unwrap_or_else(|| panic!("'{needle}' not found in {lines:#?}"))
    };
    assert!(
        pos(first) < pos(second),
        "Expected '{first}' before '{second}' in {lines:#?}"
    );
}
