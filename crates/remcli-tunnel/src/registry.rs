//! Pending-session registry pairing download and upload legs
//!
//! The first leg of a session is parked here until its partner arrives or
//! the session timeout passes. Expired entries are dropped by
//! [`SessionRegistry::purge_expired`], which closes the parked leg.

use crate::channel::{BoxWriter, DuplexChannel, LegReader};
use crate::error::RegistryError;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use remcli_auth::Principal;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};
use uuid::Uuid;

pub type SessionId = Uuid;

/// Which half of the duplex channel a request carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Response body carries server-to-client bytes
    Download,
    /// Request body carries client-to-server bytes
    Upload,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Download => "download",
            Side::Upload => "upload",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("download") {
            Ok(Side::Download)
        } else if s.eq_ignore_ascii_case("upload") {
            Ok(Side::Upload)
        } else {
            Err(format!("unknown side: {}", s))
        }
    }
}

/// Server half of a download request: bytes written here reach the client
pub struct DownloadLeg {
    pub writer: BoxWriter,
    pub principal: Principal,
}

/// Server half of an upload request: bytes read here came from the client
pub struct UploadLeg {
    pub reader: LegReader,
    pub principal: Principal,
    /// Fired once the leg is bound to a download leg
    pub paired: oneshot::Sender<()>,
}

pub enum Leg {
    Download(DownloadLeg),
    Upload(UploadLeg),
}

impl Leg {
    pub fn side(&self) -> Side {
        match self {
            Leg::Download(_) => Side::Download,
            Leg::Upload(_) => Side::Upload,
        }
    }

    pub fn principal(&self) -> &Principal {
        match self {
            Leg::Download(leg) => &leg.principal,
            Leg::Upload(leg) => &leg.principal,
        }
    }
}

/// Both legs of one session
pub struct PairedLegs {
    pub session: SessionId,
    pub download: DownloadLeg,
    pub upload: UploadLeg,
}

impl PairedLegs {
    /// Bind the legs into one channel, releasing the waiting upload request
    ///
    /// Both legs authenticated as the same principal.
    pub fn into_channel(self) -> (DuplexChannel, Principal) {
        let PairedLegs {
            session,
            download,
            upload,
        } = self;
        let _ = upload.paired.send(());
        let channel = DuplexChannel::new(session, Box::pin(upload.reader), download.writer);
        (channel, download.principal)
    }
}

/// Outcome of offering a leg to the registry
pub enum Offer {
    /// First leg of its session; waiting for the partner
    Parked,
    /// Second leg; the session is complete and no longer registered
    Paired(PairedLegs),
}

struct PendingSession {
    side: Side,
    principal: Principal,
    // the legs are Send but not Sync
    leg: Mutex<Leg>,
    created: Instant,
}

impl PendingSession {
    fn new(leg: Leg) -> Self {
        Self {
            side: leg.side(),
            principal: leg.principal().clone(),
            leg: Mutex::new(leg),
            created: Instant::now(),
        }
    }

    fn into_leg(self) -> Leg {
        self.leg.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Registry of half-open sessions
pub struct SessionRegistry {
    sessions: DashMap<SessionId, PendingSession>,
    timeout: Duration,
}

impl SessionRegistry {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: DashMap::new(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Park the first leg of a session, or pair the second one
    ///
    /// A second leg for the same side, or one authenticated as someone
    /// else, is rejected and the parked leg keeps waiting. An expired entry
    /// is replaced as if the session were new.
    pub fn offer(&self, session: SessionId, leg: Leg) -> Result<Offer, RegistryError> {
        match self.sessions.entry(session) {
            Entry::Vacant(entry) => {
                trace!("Parking {} leg for session {}", leg.side(), session);
                entry.insert(PendingSession::new(leg));
                Ok(Offer::Parked)
            }
            Entry::Occupied(mut entry) => {
                if entry.get().created.elapsed() >= self.timeout {
                    debug!("Session {} expired before pairing; restarting", session);
                    entry.insert(PendingSession::new(leg));
                    return Ok(Offer::Parked);
                }

                let side = leg.side();
                if entry.get().side == side {
                    return Err(RegistryError::DuplicateLeg { session, side });
                }
                if entry.get().principal != *leg.principal() {
                    return Err(RegistryError::PrincipalMismatch { session });
                }

                let (_, pending) = entry.remove_entry();
                trace!("Pairing session {}", session);
                match (pending.into_leg(), leg) {
                    (Leg::Download(download), Leg::Upload(upload))
                    | (Leg::Upload(upload), Leg::Download(download)) => {
                        Ok(Offer::Paired(PairedLegs {
                            session,
                            download,
                            upload,
                        }))
                    }
                    _ => Err(RegistryError::DuplicateLeg { session, side }),
                }
            }
        }
    }

    /// Drop every session older than the timeout; returns how many went
    pub fn purge_expired(&self) -> usize {
        let before = self.sessions.len();
        self.sessions
            .retain(|_, pending| pending.created.elapsed() < self.timeout);
        let purged = before.saturating_sub(self.sessions.len());
        if purged > 0 {
            debug!("Purged {} expired session(s)", purged);
        }
        purged
    }

    pub fn contains(&self, session: &SessionId) -> bool {
        self.sessions.contains_key(session)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Periodically purge expired sessions until the registry is dropped
    pub fn spawn_reaper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match registry.upgrade() {
                    Some(registry) => {
                        registry.purge_expired();
                    }
                    None => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn download_leg() -> (Leg, tokio::io::DuplexStream) {
        download_leg_as(Principal::anonymous())
    }

    fn download_leg_as(principal: Principal) -> (Leg, tokio::io::DuplexStream) {
        let (writer, client) = tokio::io::duplex(64);
        (
            Leg::Download(DownloadLeg {
                writer: Box::pin(writer),
                principal,
            }),
            client,
        )
    }

    fn upload_leg() -> (Leg, oneshot::Receiver<()>) {
        upload_leg_as(Principal::anonymous())
    }

    fn upload_leg_as(principal: Principal) -> (Leg, oneshot::Receiver<()>) {
        let (_client, reader) = tokio::io::duplex(64);
        let (reader, _released) = LegReader::new(Box::pin(reader));
        let (paired, paired_rx) = oneshot::channel();
        let leg = Leg::Upload(UploadLeg {
            reader,
            principal,
            paired,
        });
        (leg, paired_rx)
    }

    #[test]
    fn test_side_parsing() {
        assert_eq!("download".parse::<Side>().unwrap(), Side::Download);
        assert_eq!("Upload".parse::<Side>().unwrap(), Side::Upload);
        assert!("sideways".parse::<Side>().is_err());
        assert_eq!(Side::Download.to_string(), "download");
    }

    #[tokio::test]
    async fn test_pairs_in_either_order() {
        let registry = SessionRegistry::new(Duration::from_secs(15));

        let first = Uuid::new_v4();
        let (down, _client) = download_leg();
        assert!(matches!(registry.offer(first, down), Ok(Offer::Parked)));
        assert!(registry.contains(&first));
        let (up, paired_rx) = upload_leg();
        match registry.offer(first, up) {
            Ok(Offer::Paired(pair)) => {
                assert_eq!(pair.session, first);
                let (channel, principal) = pair.into_channel();
                assert_eq!(channel.session(), first);
                assert!(principal.is_anonymous());
            }
            _ => panic!("expected pairing"),
        }
        assert!(paired_rx.await.is_ok());
        assert!(registry.is_empty());

        let second = Uuid::new_v4();
        let (up, _paired_rx) = upload_leg();
        assert!(matches!(registry.offer(second, up), Ok(Offer::Parked)));
        let (down, _client) = download_leg();
        assert!(matches!(registry.offer(second, down), Ok(Offer::Paired(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_leg_rejected() {
        let registry = SessionRegistry::new(Duration::from_secs(15));
        let session = Uuid::new_v4();

        let (down, _c1) = download_leg();
        registry.offer(session, down).unwrap();
        let (again, _c2) = download_leg();
        match registry.offer(session, again) {
            Err(err) => assert_eq!(
                err,
                RegistryError::DuplicateLeg {
                    session,
                    side: Side::Download
                }
            ),
            Ok(_) => panic!("duplicate leg accepted"),
        }
        // the original leg is still parked
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_legs_of_different_principals_not_paired() {
        let registry = SessionRegistry::new(Duration::from_secs(15));
        let session = Uuid::new_v4();
        let alice = Principal {
            name: "alice".to_string(),
            scheme: "basic",
        };
        let mallory = Principal {
            name: "mallory".to_string(),
            scheme: "basic",
        };

        let (down, _client) = download_leg_as(alice.clone());
        registry.offer(session, down).unwrap();
        let (up, _paired_rx) = upload_leg_as(mallory);
        assert_eq!(
            registry.offer(session, up).err(),
            Some(RegistryError::PrincipalMismatch { session })
        );
        assert!(registry.contains(&session));

        let (up, _paired_rx) = upload_leg_as(alice);
        assert!(matches!(registry.offer(session, up), Ok(Offer::Paired(_))));
    }

    #[tokio::test]
    async fn test_purge_closes_parked_leg() {
        let registry = SessionRegistry::new(Duration::ZERO);
        let session = Uuid::new_v4();

        let (up, paired_rx) = upload_leg();
        registry.offer(session, up).unwrap();
        assert_eq!(registry.purge_expired(), 1);
        assert!(registry.is_empty());
        // dropped without pairing
        assert!(paired_rx.await.is_err());
    }

    #[test]
    fn test_expired_entry_replaced() {
        let registry = SessionRegistry::new(Duration::ZERO);
        let session = Uuid::new_v4();

        let (first, _c1) = download_leg();
        registry.offer(session, first).unwrap();
        let (second, _c2) = download_leg();
        assert!(matches!(registry.offer(session, second), Ok(Offer::Parked)));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_purges_and_stops() {
        let registry = Arc::new(SessionRegistry::new(Duration::from_secs(15)));
        let (down, _client) = download_leg();
        registry.offer(Uuid::new_v4(), down).unwrap();

        let reaper = registry.spawn_reaper(Duration::from_secs(1));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(registry.len(), 1);
        tokio::time::sleep(Duration::from_secs(12)).await;
        assert!(registry.is_empty());

        drop(registry);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(reaper.is_finished());
    }
}
