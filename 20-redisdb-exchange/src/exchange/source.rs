use std::fmt;

/// Declares one category of event sources with its wire names.
macro_rules! source_category {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $value:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn parse(value: &str) -> Option<Self> {
                match value {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }

            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $value),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

source_category!(
    /// Core application modules.
    Module {
        Devices => "devices",
        Accounts => "accounts",
        Triggers => "triggers",
        Ui => "ui",
    }
);

source_category!(
    Plugin {
        RedisDb => "redisdb",
        WsServer => "ws-server",
        WebServer => "web-server",
        CouchDb => "couchdb",
        ApiKey => "api-key",
    }
);

source_category!(
    /// Device connectors.
    Connector {
        FbMqtt => "fb-mqtt",
        Shelly => "shelly",
        Tuya => "tuya",
        Sonoff => "sonoff",
        Modbus => "modbus",
        HomeKit => "homekit",
        Virtual => "virtual",
        Zigbee2Mqtt => "zigbee2mqtt",
    }
);

source_category!(
    Automator {
        DateTime => "date-time",
        Devices => "devices",
    }
);

source_category!(
    Addon {
        VirtualThermostat => "virtual-thermostat",
    }
);

source_category!(
    Bridge {
        RedisDbDevices => "redisdb-devices",
    }
);

/// Origin of an exchange event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Module(Module),
    Plugin(Plugin),
    Connector(Connector),
    Automator(Automator),
    Addon(Addon),
    Bridge(Bridge),
}

impl Source {
    /// Resolves a wire name, probing categories in a fixed order.
    ///
    /// A name known to several categories resolves to the first of module,
    /// plugin, connector, automator, addon, bridge.
    pub fn resolve(value: &str) -> Option<Self> {
        Module::parse(value)
            .map(Self::Module)
            .or_else(|| Plugin::parse(value).map(Self::Plugin))
            .or_else(|| Connector::parse(value).map(Self::Connector))
            .or_else(|| Automator::parse(value).map(Self::Automator))
            .or_else(|| Addon::parse(value).map(Self::Addon))
            .or_else(|| Bridge::parse(value).map(Self::Bridge))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Module(source) => source.as_str(),
            Self::Plugin(source) => source.as_str(),
            Self::Connector(source) => source.as_str(),
            Self::Automator(source) => source.as_str(),
            Self::Addon(source) => source.as_str(),
            Self::Bridge(source) => source.as_str(),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! source_from {
    ($($category:ident),+) => {
        $(impl From<$category> for Source {
            fn from(source: $category) -> Self {
                Self::$category(source)
            }
        })+
    };
}

source_from!(Module, Plugin, Connector, Automator, Addon, Bridge);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_every_category() {
        assert_eq!(Source::resolve("devices"), Some(Source::Module(Module::Devices)));
        assert_eq!(Source::resolve("redisdb"), Some(Source::Plugin(Plugin::RedisDb)));
        assert_eq!(Source::resolve("shelly"), Some(Source::Connector(Connector::Shelly)));
        assert_eq!(
            Source::resolve("date-time"),
            Some(Source::Automator(Automator::DateTime))
        );
        assert_eq!(
            Source::resolve("virtual-thermostat"),
            Some(Source::Addon(Addon::VirtualThermostat))
        );
        assert_eq!(
            Source::resolve("redisdb-devices"),
            Some(Source::Bridge(Bridge::RedisDbDevices))
        );
        assert_eq!(Source::resolve("Devices"), None);
        assert_eq!(Source::resolve(""), None);
    }

    #[test]
    fn wire_names_survive_display() {
        let names = Module::ALL
            .iter()
            .map(|source| Source::from(*source))
            .chain(Connector::ALL.iter().map(|source| Source::from(*source)))
            .map(|source| source.to_string());

        for name in names {
            assert_eq!(Source::resolve(&name).map(|source| source.to_string()), Some(name));
        }
    }
}
