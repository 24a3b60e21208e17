// used for persistence
use rusqlite::{Connection, Error, OptionalExtension, params};
// revisions are stamped with the time they were saved
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{DomError, Result};

/// Where documents are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

/// One saved state of a document.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    pub number: i64,
    pub content_hash: String,
    pub superhash: String,
    pub saved_at: DateTime<Utc>,
}

// ------------- Persistence -------------

/// Document store over SQLite.
///
/// Every save appends a revision holding the serialized document, the blake3
/// hash of that content and a "superhash" chaining it to the revision saved
/// before it, across all documents. Altering any stored revision breaks the
/// chain, which [`Persistor::verify_ledger`] detects.
pub struct Persistor {
    db: Connection,
    mode: PersistenceMode,
}

impl Persistor {
    pub fn new(mode: &PersistenceMode) -> Result<Persistor> {
        let connection = match mode {
            PersistenceMode::InMemory => Connection::open_in_memory()?,
            PersistenceMode::File(path) => Connection::open(path)?,
        };
        // The "STRICT" keyword introduced in 3.37.0 breaks JDBC connections, which makes
        // debugging using an external tool like DBeaver impossible
        connection.execute_batch(
            "
            create table if not exists Document (
                Document_Identity integer not null,
                Name text not null,
                constraint referenceable_Document_Identity primary key (
                    Document_Identity
                ),
                constraint unique_Name unique (
                    Name
                )
            );-- STRICT;
            create table if not exists Revision (
                Revision_Identity integer not null,
                Document_Identity integer not null,
                Content text not null,
                ContentHash text not null,
                SuperHash text not null,
                SavedAt text not null,
                constraint Revision_of_Document foreign key (
                    Document_Identity
                ) references Document(Document_Identity),
                constraint referenceable_Revision_Identity primary key (
                    Revision_Identity
                )
            );-- STRICT;
            ",
        )?;
        info!(mode = ?mode, "document store opened");
        Ok(Persistor { db: connection, mode: mode.clone() })
    }
    pub fn mode(&self) -> &PersistenceMode {
        &self.mode
    }
    fn document_identity(&self, name: &str) -> Result<Option<i64>> {
        let identity = self
            .db
            .prepare_cached(
                "
                select Document_Identity
                    from Document
                    where Name = ?
            ",
            )?
            .query_row(params![name], |r| r.get(0))
            .optional()?;
        Ok(identity)
    }
    fn latest(&self, document: i64) -> Result<Option<(String, String)>> {
        let latest = self
            .db
            .prepare_cached(
                "
                select Content, ContentHash
                    from Revision
                    where Document_Identity = ?
                    order by Revision_Identity desc
                    limit 1
            ",
            )?
            .query_row(params![document], |r| Ok((r.get(0)?, r.get(1)?)))
            .optional()?;
        Ok(latest)
    }
    /// Appends a revision of `name` unless `content` equals its latest one.
    /// Returns whether a revision was written.
    pub fn save(&mut self, name: &str, content: &str) -> Result<bool> {
        let content_hash = blake3::hash(content.as_bytes()).to_hex().to_string();
        let document = match self.document_identity(name)? {
            Some(document) => document,
            None => {
                self.db
                    .prepare_cached(
                        "
                insert into Document (
                    Name
                ) values (?)
            ",
                    )?
                    .execute(params![name])?;
                self.db.last_insert_rowid()
            }
        };
        if let Some((_, latest_hash)) = self.latest(document)? {
            if latest_hash == content_hash {
                debug!(document = name, "content unchanged, no revision written");
                return Ok(false);
            }
        }
        let previous = self.current_superhash()?.unwrap_or_default();
        let superhash = chain(&previous, &content_hash);
        let transaction = self.db.transaction()?;
        transaction
            .prepare_cached(
                "
                insert into Revision (
                    Document_Identity,
                    Content,
                    ContentHash,
                    SuperHash,
                    SavedAt
                ) values (?, ?, ?, ?, ?)
            ",
            )?
            .execute(params![document, content, &content_hash, &superhash, Utc::now()])?;
        transaction.commit()?;
        info!(document = name, hash = %content_hash, "revision saved");
        Ok(true)
    }
    /// Content of the latest revision of `name`.
    pub fn load(&self, name: &str) -> Result<Option<String>> {
        match self.document_identity(name)? {
            Some(document) => Ok(self.latest(document)?.map(|(content, _)| content)),
            None => Ok(None),
        }
    }
    /// Superhash of the most recent revision of any document.
    pub fn current_superhash(&self) -> Result<Option<String>> {
        match self.db.query_row(
            "select SuperHash from Revision order by Revision_Identity desc limit 1",
            [],
            |r| r.get::<_, String>(0),
        ) {
            Ok(head) => Ok(Some(head)),
            Err(Error::QueryReturnedNoRows) => Ok(None),
            Err(err) => Err(err.into()),
        }
    }
    pub fn revisions(&self, name: &str) -> Result<Vec<Revision>> {
        let Some(document) = self.document_identity(name)? else {
            return Ok(Vec::new());
        };
        let mut statement = self.db.prepare_cached(
            "
                select Revision_Identity, ContentHash, SuperHash, SavedAt
                    from Revision
                    where Document_Identity = ?
                    order by Revision_Identity
            ",
        )?;
        let revisions = statement
            .query_map(params![document], |row| {
                Ok(Revision { number: row.get(0)?, content_hash: row.get(1)?, superhash: row.get(2)?, saved_at: row.get(3)? })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(revisions)
    }
    pub fn document_names(&self) -> Result<Vec<String>> {
        let mut statement = self.db.prepare_cached("select Name from Document order by Name")?;
        let names = statement.query_map([], |row| row.get(0))?.collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(names)
    }
    /// Recomputes every content hash and the superhash chain.
    pub fn verify_ledger(&self) -> Result<()> {
        let mut statement = self
            .db
            .prepare_cached("select Revision_Identity, Content, ContentHash, SuperHash from Revision order by Revision_Identity")?;
        let mut rows = statement.query([])?;
        let mut previous = String::new();
        while let Some(row) = rows.next()? {
            let number: i64 = row.get(0)?;
            let content: String = row.get(1)?;
            let content_hash: String = row.get(2)?;
            let superhash: String = row.get(3)?;
            if blake3::hash(content.as_bytes()).to_hex().as_str() != content_hash {
                return Err(DomError::Persistence(format!("content of revision {} was altered", number)));
            }
            if chain(&previous, &content_hash) != superhash {
                return Err(DomError::Persistence(format!("ledger chain breaks at revision {}", number)));
            }
            previous = superhash;
        }
        Ok(())
    }
}

// cryptographic hashing for the tamper-evident revision ledger
fn chain(previous: &str, content_hash: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(previous.as_bytes());
    hasher.update(content_hash.as_bytes());
    hasher.finalize().to_hex().to_string()
}
