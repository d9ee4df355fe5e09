//! Ready-made test dependencies built on [`provisioner`].
//!
//! - [`mysql`]: a MySQL 8 server initialised from `schema.sql`, returned as a
//!   `sqlx` pool.
//! - [`firebase`]: the Firebase emulator suite built from
//!   `docker/firebase/Dockerfile`, with a [`firestore::FirestoreClient`].

pub mod firebase;
pub mod firestore;
pub mod mysql;

pub use firebase::{provision_firebase, provision_firebase_with, FirebaseEmulator, FirebaseSettings};
pub use firestore::{CollectionRef, Document, FirestoreClient, FirestoreError};
pub use mysql::{provision_mysql, provision_mysql_with, MySqlPingProbe, MySqlSettings};
