use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const SESSDATA: &str = "SESSDATA";
pub const BILI_JCT: &str = "bili_jct";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCookie {
    pub name: String,
    pub value: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default = "default_cookie_path")]
    pub path: String,
    /// Seconds since the epoch, `-1` for session cookies.
    #[serde(default = "default_expires")]
    pub expires: f64,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub same_site: Option<String>,
}

fn default_cookie_path() -> String {
    "/".into()
}

fn default_expires() -> f64 {
    -1.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub nickname: String,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub is_default: bool,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub login_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

/// Cookie name/value pairs handed explicitly to an API client.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credential {
    pub account: String,
    pub cookies: Vec<(String, String)>,
}

impl Credential {
    pub fn new(account: impl Into<String>, cookies: Vec<(String, String)>) -> Self {
        Self {
            account: account.into(),
            cookies,
        }
    }

    /// A credential carrying no cookies. API calls made with it are anonymous.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_session(&self) -> bool {
        self.get(SESSDATA).is_some_and(|v| !v.is_empty())
    }

    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(n, v)| format!("{}={}", n, v))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Builds a credential from cookies read back out of a browser context.
    /// Fails when no `SESSDATA` is present: the account has to log in again.
    pub fn from_cookies(account: &str, cookies: &[StoredCookie]) -> Result<Self> {
        let credential = Self::new(
            account,
            cookies
                .iter()
                .map(|c| (c.name.clone(), c.value.clone()))
                .collect(),
        );
        if !credential.has_session() {
            return Err(Error::AuthenticationUnavailable {
                account: account.to_string(),
                reason: format!("no {} cookie, log in again", SESSDATA),
            });
        }
        Ok(credential)
    }
}

#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load_cookies(&self, account: &str) -> Result<Vec<StoredCookie>>;
    async fn default_account(&self) -> Result<String>;
}

pub struct FileCredentialStore {
    cookie_dir: PathBuf,
}

impl FileCredentialStore {
    pub fn new(cookie_dir: impl Into<PathBuf>) -> Self {
        Self {
            cookie_dir: cookie_dir.into(),
        }
    }

    pub fn accounts_file(&self) -> PathBuf {
        self.cookie_dir.join("accounts.json")
    }

    pub fn cookie_file(&self, account: &str) -> PathBuf {
        self.cookie_dir
            .join(format!("{}_bilibili_cookies.json", account))
    }

    pub async fn load_accounts(&self) -> Result<Vec<Account>> {
        let path = self.accounts_file();
        match tokio::fs::read(&path).await {
            Ok(data) => serde_json::from_slice(&data)
                .map_err(|e| Error::Config(format!("{}: {}", path.display(), e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::filesystem(path, e)),
        }
    }
}

fn unavailable(account: &str, reason: impl Into<String>) -> Error {
    Error::AuthenticationUnavailable {
        account: account.to_string(),
        reason: reason.into(),
    }
}

pub fn pick_default_account(accounts: &[Account]) -> Option<&Account> {
    accounts
        .iter()
        .find(|a| a.is_default && a.is_active)
        .or_else(|| accounts.iter().find(|a| a.is_active))
}

async fn read_cookie_file(path: &Path, account: &str) -> Result<Vec<StoredCookie>> {
    let data = tokio::fs::read(path).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            unavailable(account, "no saved cookies, log in first")
        } else {
            Error::filesystem(path, e)
        }
    })?;
    serde_json::from_slice(&data)
        .map_err(|e| unavailable(account, format!("unreadable cookie file: {}", e)))
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load_cookies(&self, account: &str) -> Result<Vec<StoredCookie>> {
        let path = self.cookie_file(account);
        let cookies = read_cookie_file(&path, account).await?;
        tracing::debug!(
            "[session] loaded {} cookies for '{}' from {}",
            cookies.len(),
            account,
            path.display()
        );
        Ok(cookies)
    }

    async fn default_account(&self) -> Result<String> {
        let accounts = self.load_accounts().await?;
        pick_default_account(&accounts)
            .map(|a| a.name.clone())
            .ok_or_else(|| unavailable("<default>", "no active account, log in first"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(name: &str, is_default: bool, is_active: bool) -> Account {
        Account {
            name: name.into(),
            username: String::new(),
            nickname: String::new(),
            uid: String::new(),
            is_default,
            is_active,
            login_time: None,
            last_used: None,
        }
    }

    fn cookie(name: &str, value: &str) -> StoredCookie {
        StoredCookie {
            name: name.into(),
            value: value.into(),
            domain: ".bilibili.com".into(),
            path: "/".into(),
            expires: -1.0,
            http_only: false,
            secure: false,
            same_site: None,
        }
    }

    #[test]
    fn default_prefers_active_default() {
        let accounts = vec![
            account("a", true, false),
            account("b", false, true),
            account("c", true, true),
        ];
        assert_eq!(pick_default_account(&accounts).unwrap().name, "c");
    }

    #[test]
    fn default_falls_back_to_first_active() {
        let accounts = vec![account("a", true, false), account("b", false, true)];
        assert_eq!(pick_default_account(&accounts).unwrap().name, "b");
        assert!(pick_default_account(&[account("x", true, false)]).is_none());
    }

    #[test]
    fn credential_requires_sessdata() {
        let err = Credential::from_cookies("alice", &[cookie("bili_jct", "t")]).unwrap_err();
        assert!(matches!(err, Error::AuthenticationUnavailable { .. }));

        let cred = Credential::from_cookies("alice", &[cookie("SESSDATA", "s")]).unwrap();
        assert!(cred.has_session());
        assert_eq!(cred.cookie_header(), "SESSDATA=s");
    }

    #[test]
    fn cookie_header_joins_pairs() {
        let cred = Credential::new(
            "alice",
            vec![("SESSDATA".into(), "s".into()), ("bili_jct".into(), "j".into())],
        );
        assert_eq!(cred.cookie_header(), "SESSDATA=s; bili_jct=j");
    }

    #[test]
    fn cookie_file_parses_playwright_export() {
        let json = r#"[{"name":"SESSDATA","value":"abc","domain":".bilibili.com","path":"/",
            "expires":1767225600.5,"httpOnly":true,"secure":true,"sameSite":"Lax"}]"#;
        let cookies: Vec<StoredCookie> = serde_json::from_str(json).unwrap();
        assert_eq!(cookies[0].same_site.as_deref(), Some("Lax"));
        assert!(cookies[0].http_only);
    }

    #[tokio::test]
    async fn file_store_resolves_and_reads() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        std::fs::write(
            store.accounts_file(),
            r#"[{"name":"alice","is_default":true,"is_active":true}]"#,
        )
        .unwrap();
        std::fs::write(
            store.cookie_file("alice"),
            r#"[{"name":"SESSDATA","value":"abc"}]"#,
        )
        .unwrap();

        assert_eq!(store.default_account().await.unwrap(), "alice");
        let cookies = store.load_cookies("alice").await.unwrap();
        assert_eq!(cookies.len(), 1);
        assert_eq!(cookies[0].path, "/");
    }

    #[tokio::test]
    async fn missing_cookie_file_is_auth_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::new(dir.path());
        assert!(matches!(
            store.load_cookies("ghost").await,
            Err(Error::AuthenticationUnavailable { .. })
        ));
        assert!(matches!(
            store.default_account().await,
            Err(Error::AuthenticationUnavailable { .. })
        ));
    }
}
