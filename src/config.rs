/*!
Structs to hold configuration data and global variables.
*/
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{
    auth::{self, AuthResult, Sessions},
    store::Store,
};

#[derive(Deserialize)]
struct ConfigFile {
    db_connect_string: Option<String>,
    admin_uname: Option<String>,
    admin_password: Option<String>,
    admin_email: Option<String>,
    admin_name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    templates_dir: Option<String>,
    static_dir: Option<String>,
    session_timeout_minutes: Option<u64>,
    min_password_length: Option<usize>,
}

#[derive(Debug)]
pub struct Cfg {
    pub db_connect_string: String,
    pub default_admin_uname: String,
    pub default_admin_password: String,
    pub default_admin_email: String,
    pub default_admin_name: String,
    pub addr: SocketAddr,
    pub templates_dir: PathBuf,
    pub static_dir: PathBuf,
    pub session_timeout: Duration,
    pub min_password_length: usize,
}

impl std::default::Default for Cfg {
    fn default() -> Self {
        Self {
            db_connect_string: "host=localhost user=registrar password='registrar' dbname=registrar".to_owned(),
            default_admin_uname: "admin".to_owned(),
            default_admin_password: "admin123".to_owned(),
            default_admin_email: "admin@registrar.not.an.address".to_owned(),
            default_admin_name: "System Administrator".to_owned(),
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8001),
            templates_dir: PathBuf::from("templates/"),
            static_dir: PathBuf::from("static/"),
            session_timeout: Duration::from_secs(30 * 60),
            min_password_length: 6,
        }
    }
}

impl Cfg {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let file_contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Unable to read config file {}: {}", path.display(), &e))?;
        Self::from_toml(&file_contents)
    }

    /// Overlay the values present in the TOML `text` onto the defaults.
    pub fn from_toml(text: &str) -> Result<Self, String> {
        let cf: ConfigFile = toml::from_str(text)
            .map_err(|e| format!("Unable to deserialize config file: {}", &e))?;

        let mut c = Self::default();

        if let Some(s) = cf.db_connect_string {
            c.db_connect_string = s;
        }
        if let Some(s) = cf.admin_uname {
            c.default_admin_uname = s;
        }
        if let Some(s) = cf.admin_password {
            c.default_admin_password = s;
        }
        if let Some(s) = cf.admin_email {
            c.default_admin_email = s;
        }
        if let Some(s) = cf.admin_name {
            c.default_admin_name = s;
        }
        if let Some(s) = cf.host {
            c.addr.set_ip(
                s.parse().map_err(|e| format!(
                    "Error parsing {:?} as IP address: {}",
                    &s, &e
                ))?
            );
        }
        if let Some(n) = cf.port {
            c.addr.set_port(n);
        }
        if let Some(s) = cf.templates_dir {
            c.templates_dir = PathBuf::from(s);
        }
        if let Some(s) = cf.static_dir {
            c.static_dir = PathBuf::from(s);
        }
        if let Some(n) = cf.session_timeout_minutes {
            if n == 0 {
                return Err("session_timeout_minutes must be at least 1.".to_owned());
            }
            c.session_timeout = Duration::from_secs(n * 60);
        }
        if let Some(n) = cf.min_password_length {
            c.min_password_length = n;
        }

        Ok(c)
    }
}

/**
This guy will haul around some global variables and be passed in an
`axum::Extension` to the handlers who need him.
*/
#[derive(Debug)]
pub struct Glob {
    store: Store,
    pub sessions: Sessions,
    pub min_password_length: usize,
}

impl Glob {
    pub fn new(store: Store, sessions: Sessions, min_password_length: usize) -> Glob {
        Glob {
            store,
            sessions,
            min_password_length,
        }
    }

    pub fn data(&self) -> &Store { &self.store }
}

/**
Loads system configuration and ensures all appropriate database tables
exist.

Also assures existence of default admin.
*/
pub async fn load_configuration(cfg: &Cfg) -> Result<Glob, String> {
    log::trace!("Checking state of data DB...");
    let store = Store::new(cfg.db_connect_string.clone());
    if let Err(e) = store.ensure_db_schema().await {
        let estr = format!("Unable to ensure state of data DB: {}", &e);
        return Err(estr);
    }
    log::trace!("...data DB okay.");

    log::trace!("Checking existence of default Admin in data DB...");
    match store.get_admin_by_uname(&cfg.default_admin_uname).await {
        Err(e) => {
            let estr = format!(
                "Error attempting to check existence of default Admin ({}) in data DB: {}",
                &cfg.default_admin_uname, &e
            );
            return Err(estr);
        },
        Ok(None) => {
            log::info!(
                "Default Admin ({}) doesn't exist in data DB; inserting.",
                &cfg.default_admin_uname
            );
            let hash = auth::hash_password(&cfg.default_admin_password)?;
            store.insert_admin(
                &cfg.default_admin_uname,
                &cfg.default_admin_email,
                &cfg.default_admin_name,
                &hash
            ).await.map_err(|e| format!(
                "Error inserting default Admin into data DB: {}", &e
            ))?;
        },
        Ok(Some(admin)) => {
            let stored = store.get_password_hash(&admin.actor()).await
                .map_err(|e| format!(
                    "Error retrieving default Admin password hash: {}", &e
                ))?;
            match stored.as_deref().map(|h| auth::check_password(
                &cfg.default_admin_password, h
            )) {
                Some(AuthResult::Ok) => {
                    log::warn!(
                        "Default Admin ({}) is still using the default password.",
                        &admin.uname
                    );
                },
                Some(_) => {
                    log::trace!("Default Admin not using default password.");
                },
                None => {
                    return Err(format!(
                        "Default Admin ({}) vanished during startup.",
                        &admin.uname
                    ));
                },
            }
        },
    }
    log::trace!("Default Admin OK in data DB.");

    Ok(Glob::new(
        store,
        Sessions::new(cfg.session_timeout),
        cfg.min_password_length,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::ensure_logging;

    #[test]
    fn defaults_fill_gaps() {
        ensure_logging();
        let cfg = Cfg::from_toml(r#"
            db_connect_string = "host=db user=reg dbname=reg"
            port = 8080
            session_timeout_minutes = 5
        "#).unwrap();

        assert_eq!(cfg.db_connect_string, "host=db user=reg dbname=reg");
        assert_eq!(cfg.addr.port(), 8080);
        assert_eq!(cfg.addr.ip(), IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(cfg.session_timeout, Duration::from_secs(300));
        assert_eq!(cfg.min_password_length, 6);
        assert_eq!(cfg.templates_dir, PathBuf::from("templates/"));
        assert_eq!(cfg.default_admin_uname, "admin");
    }

    #[test]
    fn bad_values_rejected() {
        assert!(Cfg::from_toml("host = \"not an address\"").is_err());
        assert!(Cfg::from_toml("session_timeout_minutes = 0").is_err());
        assert!(Cfg::from_toml("port = \"eighty\"").is_err());
        assert!(Cfg::from_toml("").is_ok());
    }
}
