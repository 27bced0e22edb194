pub const Q_360P: u32 = 16;
pub const Q_480P: u32 = 32;
pub const Q_720P: u32 = 64;
pub const Q_720P60: u32 = 74;
pub const Q_1080P: u32 = 80;
pub const Q_1080P_PLUS: u32 = 112;
pub const Q_1080P60: u32 = 116;
pub const Q_4K: u32 = 120;
pub const Q_HDR: u32 = 125;
pub const Q_DOLBY_VISION: u32 = 126;
pub const Q_8K: u32 = 127;

/// Split-manifest target when the caller did not ask for a quality.
pub const DEFAULT_SPLIT_QUALITY: u32 = Q_1080P;

/// `fnval` selecting a muxed MP4 response.
pub const FNVAL_MP4: u32 = 1;
/// `fnval` selecting a DASH (split) response.
pub const FNVAL_DASH: u32 = 16;
pub const PLATFORM_HTML5: &str = "html5";

/// Ids that have historically been offered muxed.
pub const MUXED_CANDIDATES: [u32; 3] = [Q_720P, Q_480P, Q_360P];

/// Display order, best first.
pub const PREFERENCE_ORDER: [u32; 11] = [
    Q_8K,
    Q_HDR,
    Q_DOLBY_VISION,
    Q_4K,
    Q_1080P60,
    Q_1080P_PLUS,
    Q_1080P,
    Q_720P60,
    Q_720P,
    Q_480P,
    Q_360P,
];

pub fn quality_label(quality: u32) -> String {
    match quality {
        Q_360P => "360p".into(),
        Q_480P => "480p".into(),
        Q_720P => "720p".into(),
        Q_720P60 => "720p60".into(),
        Q_1080P => "1080p".into(),
        Q_1080P_PLUS => "1080p+".into(),
        Q_1080P60 => "1080p60".into(),
        Q_4K => "4K".into(),
        Q_HDR => "HDR".into(),
        Q_DOLBY_VISION => "DolbyVision".into(),
        Q_8K => "8K".into(),
        other => format!("Q{}", other),
    }
}

pub fn quality_for_height(height: u32) -> u32 {
    match height {
        h if h >= 2160 => Q_4K,
        h if h >= 1080 => Q_1080P,
        h if h >= 720 => Q_720P,
        h if h >= 480 => Q_480P,
        _ => Q_360P,
    }
}

pub fn is_known_quality(quality: u32) -> bool {
    PREFERENCE_ORDER.contains(&quality)
}

/// Order in which muxed representations are tried. An id the platform does not
/// define is tried once as-is and then handled like an unset request.
pub fn muxed_probe_order(requested: Option<u32>) -> Vec<u32> {
    let Some(q) = requested.filter(|q| *q > 0) else {
        return MUXED_CANDIDATES.to_vec();
    };
    let mut order = vec![q];
    if is_known_quality(q) && q > Q_1080P {
        order.push(Q_1080P);
    }
    order.extend(MUXED_CANDIDATES.iter().filter(|c| **c != q));
    order
}

/// Quality asked of the split manifest.
pub fn split_target(requested: Option<u32>) -> u32 {
    requested
        .filter(|q| is_known_quality(*q))
        .unwrap_or(DEFAULT_SPLIT_QUALITY)
}

/// Rank used to sort catalog entries. Ids outside the preference list sort
/// after every known id, higher ids first.
pub fn preference_rank(quality: u32) -> (usize, std::cmp::Reverse<u32>) {
    let rank = PREFERENCE_ORDER
        .iter()
        .position(|q| *q == quality)
        .unwrap_or(PREFERENCE_ORDER.len());
    (rank, std::cmp::Reverse(quality))
}
