/// Drive letters only exist on Windows.
pub fn occupied_letters() -> Vec<char> {
    Vec::new()
}
