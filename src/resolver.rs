use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

/// Maps the app names the model uses to launchable package ids.
pub trait AppResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Option<String>;

    /// Human-readable name for a package id, if one is known.
    fn display_name(&self, _package: &str) -> Option<String> {
        None
    }
}

const BUILTIN_APPS: &[(&str, &str)] = &[
    ("Settings", "com.android.settings"),
    ("设置", "com.android.settings"),
    ("Android System Settings", "com.android.settings"),
    ("Camera", "com.android.camera2"),
    ("相机", "com.android.camera2"),
    ("Phone", "com.google.android.dialer"),
    ("电话", "com.google.android.dialer"),
    ("Messages", "com.google.android.apps.messaging"),
    ("短信", "com.google.android.apps.messaging"),
    ("Photos", "com.google.android.apps.photos"),
    ("相册", "com.google.android.apps.photos"),
    ("Contacts", "com.android.contacts"),
    ("联系人", "com.google.android.contacts"),
    ("Google Contacts", "com.google.android.contacts"),
    ("Calendar", "com.google.android.calendar"),
    ("日历", "com.google.android.calendar"),
    ("Clock", "com.android.deskclock"),
    ("时钟", "com.google.android.deskclock"),
    ("Calculator", "com.google.android.calculator"),
    ("计算器", "com.google.android.calculator"),
    ("Files", "com.android.fileexplorer"),
    ("文件", "com.google.android.documentsui"),
    ("Files by Google", "com.google.android.apps.nbu.files"),
    ("Chrome", "com.android.chrome"),
    ("浏览器", "com.android.chrome"),
    ("Play Store", "com.android.vending"),
    ("应用商店", "com.android.vending"),
    ("Gmail", "com.google.android.gm"),
    ("Maps", "com.google.android.apps.maps"),
    ("Google Maps", "com.google.android.apps.maps"),
    ("YouTube", "com.google.android.youtube"),
    ("微信", "com.tencent.mm"),
    ("WeChat", "com.tencent.mm"),
    ("QQ", "com.tencent.mobileqq"),
    ("支付宝", "com.eg.android.AlipayGphone"),
    ("Alipay", "com.eg.android.AlipayGphone"),
    ("淘宝", "com.taobao.taobao"),
    ("Taobao", "com.taobao.taobao"),
    ("美团", "com.sankuai.meituan"),
    ("抖音", "com.ss.android.ugc.aweme"),
    ("TikTok", "com.zhiliaoapp.musically"),
    ("小红书", "com.xingin.xhs"),
    ("哔哩哔哩", "tv.danmaku.bili"),
    ("bilibili", "tv.danmaku.bili"),
    ("高德地图", "com.autonavi.minimap"),
    ("WhatsApp", "com.whatsapp"),
    ("Telegram", "org.telegram.messenger"),
    ("Reddit", "com.reddit.frontpage"),
    ("VLC", "org.videolan.vlc"),
];

/// Name → package table: exact match first, then case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct AppTable {
    exact: HashMap<String, String>,
    folded: HashMap<String, String>,
    // first name registered for each package
    names: HashMap<String, String>,
}

impl AppTable {
    pub fn builtin() -> Self {
        let mut table = Self::default();
        for &(name, package) in BUILTIN_APPS {
            table.insert(name, package);
        }
        table
    }

    pub fn insert(&mut self, name: impl Into<String>, package: impl Into<String>) {
        let name = name.into();
        let package = package.into();
        self.names
            .entry(package.clone())
            .or_insert_with(|| name.clone());
        self.folded.insert(name.to_lowercase(), package.clone());
        self.exact.insert(name, package);
    }

    pub fn len(&self) -> usize {
        self.exact.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty()
    }

    /// Where user overrides live unless a path is given.
    pub fn default_overrides_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("autoglm-agent").join("apps.json"))
    }

    /// Merge a JSON object of `{"App Name": "package.id"}` over the table.
    pub fn load_overrides(&mut self, path: &Path) -> Result<usize> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading app table {}", path.display()))?;
        let entries: HashMap<String, String> = serde_json::from_str(&raw)
            .with_context(|| format!("parsing app table {}", path.display()))?;
        let count = entries.len();
        for (name, package) in entries {
            self.insert(name, package);
        }
        info!(path = %path.display(), count, "loaded app overrides");
        Ok(count)
    }
}

impl AppResolver for AppTable {
    fn resolve(&self, name: &str) -> Option<String> {
        let name = name.trim();
        self.exact
            .get(name)
            .or_else(|| self.folded.get(&name.to_lowercase()))
            .cloned()
    }

    fn display_name(&self, package: &str) -> Option<String> {
        self.names.get(package.trim()).cloned()
    }
}
