// murmur-common: wire types shared by the relay server and the CLI.

pub mod protocol;
