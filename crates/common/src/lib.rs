// sessionroom-common: wire types shared by the room server and clients

pub mod protocol;
