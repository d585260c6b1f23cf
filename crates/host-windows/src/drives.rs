use windows::Win32::Storage::FileSystem::GetLogicalDrives;

/// Drive letters currently assigned on this host.
pub fn occupied_letters() -> Vec<char> {
    let mask = unsafe { GetLogicalDrives() };
    ('A'..='Z')
        .enumerate()
        .filter(|(idx, _)| mask & (1u32 << idx) != 0)
        .map(|(_, letter)| letter)
        .collect()
}
