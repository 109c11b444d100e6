use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use serde_derive::{Deserialize, Serialize};

use crate::com::DEFAULT_PORT;
use crate::TerminalResult;

/// One entry of the dialing directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Address {
    pub system_name: String,
    /// `host` or `host:port`.
    pub address: String,
    #[serde(default)]
    pub comment: String,
}

impl Address {
    pub fn new(system_name: &str, address: &str) -> Self {
        Self {
            system_name: system_name.to_string(),
            address: address.to_string(),
            comment: String::new(),
        }
    }

    /// Splits the address into host and port, defaulting to the telnet port.
    pub fn host_and_port(&self) -> (String, u16) {
        if let Some((host, port)) = self.address.rsplit_once(':') {
            if let Ok(port) = port.parse() {
                return (host.to_string(), port);
            }
        }
        (self.address.clone(), DEFAULT_PORT)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddressBook {
    pub addresses: Vec<Address>,
}

const TEMPLATE: &str = r#"
[[addresses]]
system_name = 'Metro Olografix'
address = 'bbs.olografix.org'
comment = 'Italian scene BBS, still dialing since 1994.'

[[addresses]]
system_name = 'Crazy Paradise BBS'
address = 'cpbbs.de:2323'
comment = 'Last german Amiga BBS.'

[[addresses]]
system_name = 'Deadline BBS'
address = 'deadline.aegis-corp.org:1337'
comment = 'Cool BBS running PCBoard.'
"#;

/// Location of the dialing directory file.
pub fn dialing_directory_file() -> Option<PathBuf> {
    ProjectDirs::from("org", "EmberTerm", "ember_term")
        .map(|dirs| dirs.config_dir().join("addresses.toml"))
}

impl AddressBook {
    /// Loads the dialing directory, seeding it with the template on first
    /// run.
    pub fn load() -> TerminalResult<AddressBook> {
        let Some(path) = dialing_directory_file() else {
            return Self::parse(TEMPLATE);
        };
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(&path, TEMPLATE)?;
        }
        Self::parse(&fs::read_to_string(&path)?)
    }

    pub fn parse(content: &str) -> TerminalResult<AddressBook> {
        Ok(toml::from_str(content)?)
    }

    pub fn store(&self) -> TerminalResult<()> {
        let Some(path) = dialing_directory_file() else {
            return Err("no usable config directory".into());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml::to_string(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{Address, AddressBook, TEMPLATE};

    #[test]
    fn template_parses() {
        let book = AddressBook::parse(TEMPLATE).unwrap();
        assert_eq!(book.addresses.len(), 3);
        assert_eq!(book.addresses[0].system_name, "Metro Olografix");
    }

    #[test]
    fn host_and_port_defaults_to_telnet() {
        assert_eq!(
            Address::new("a", "bbs.example.org").host_and_port(),
            ("bbs.example.org".to_string(), 23)
        );
        assert_eq!(
            Address::new("b", "bbs.example.org:2323").host_and_port(),
            ("bbs.example.org".to_string(), 2323)
        );
    }

    #[test]
    fn serializes_back_to_toml() {
        let book = AddressBook {
            addresses: vec![Address::new("Local", "127.0.0.1:2023")],
        };
        let text = toml::to_string(&book).unwrap();
        let reparsed = AddressBook::parse(&text).unwrap();
        assert_eq!(reparsed.addresses, book.addresses);
    }
}
