//! App name to package name mapping for supported applications.

use once_cell::sync::Lazy;
use std::collections::HashMap;

/// Mapping from app display names to Android package names.
pub static APP_PACKAGES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    let mut m = HashMap::new();

    // Social & Messaging
    m.insert("微信", "com.tencent.mm");
    m.insert("QQ", "com.tencent.mobileqq");
    m.insert("微博", "com.sina.weibo");

    // E-commerce
    m.insert("淘宝", "com.taobao.taobao");
    m.insert("京东", "com.jingdong.app.mall");
    m.insert("拼多多", "com.xunmeng.pinduoduo");

    // Lifestyle
    m.insert("小红书", "com.xingin.xhs");
    m.insert("知乎", "com.zhihu.android");
    m.insert("美团", "com.sankuai.meituan");
    m.insert("饿了么", "me.ele");

    // Maps & Travel
    m.insert("高德地图", "com.autonavi.minimap");
    m.insert("百度地图", "com.baidu.BaiduMap");
    m.insert("携程", "ctrip.android.view");
    m.insert("铁路12306", "com.MobileTicket");
    m.insert("12306", "com.MobileTicket");

    // Video & Music
    m.insert("bilibili", "tv.danmaku.bili");
    m.insert("抖音", "com.ss.android.ugc.aweme");
    m.insert("快手", "com.smile.gifmaker");
    m.insert("网易云音乐", "com.netease.cloudmusic");
    m.insert("QQ音乐", "com.tencent.qqmusic");

    // Common apps (English names)
    m.insert("Chrome", "com.android.chrome");
    m.insert("chrome", "com.android.chrome");
    m.insert("Gmail", "com.google.android.gm");
    m.insert("gmail", "com.google.android.gm");
    m.insert("Google Maps", "com.google.android.apps.maps");
    m.insert("Maps", "com.google.android.apps.maps");
    m.insert("YouTube", "com.google.android.youtube");
    m.insert("youtube", "com.google.android.youtube");
    m.insert("Camera", "com.android.camera");
    m.insert("Clock", "com.android.deskclock");
    m.insert("Contacts", "com.android.contacts");
    m.insert("Calendar", "com.android.calendar");
    m.insert("Calculator", "com.android.calculator2");
    m.insert("Messages", "com.android.mms");
    m.insert("Phone", "com.android.dialer");
    m.insert("Files", "com.android.fileexplorer");
    m.insert("Settings", "com.android.settings");
    m.insert("AndroidSystemSettings", "com.android.settings");

    m
});

/// Get the package name for an app by its display name.
pub fn get_package(app_name: &str) -> Option<&'static str> {
    APP_PACKAGES.get(app_name).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_package() {
        assert_eq!(get_package("微信"), Some("com.tencent.mm"));
        assert_eq!(get_package("Chrome"), Some("com.android.chrome"));
        assert_eq!(get_package("NonExistent"), None);
    }
}
