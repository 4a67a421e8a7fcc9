use remcli_channel::{ChannelError, ClassFilter, SecureChannel, SessionKey, Transformation, Value};
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWriteExt, DuplexStream, ReadBuf, ReadHalf, WriteHalf,
};

type Half = SecureChannel<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

fn pair() -> (Half, Half) {
    let (a, b) = tokio::io::duplex(64 * 1024);
    let (ar, aw) = tokio::io::split(a);
    let (br, bw) = tokio::io::split(b);
    (SecureChannel::new(ar, aw), SecureChannel::new(br, bw))
}

/// Yields a zero length prefix, then fails every further read
struct ZeroLengthThenBroken {
    served: bool,
}

impl AsyncRead for ZeroLengthThenBroken {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.served {
            return Poll::Ready(Err(io::Error::other("no more data")));
        }
        self.served = true;
        buf.put_slice(&[0, 0, 0, 0]);
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn test_zero_length_array_is_empty() {
    let mut channel = SecureChannel::new(ZeroLengthThenBroken { served: false }, tokio::io::sink());

    let data = channel.read_byte_array().await.unwrap();
    assert!(data.is_empty());
}

#[tokio::test]
async fn test_byte_array_and_primitives() {
    let (mut left, mut right) = pair();

    left.write_byte_array(b"payload").await.unwrap();
    left.write_byte_array(&[]).await.unwrap();
    left.write_utf("héllo").await.unwrap();
    left.write_bool(true).await.unwrap();

    assert_eq!(right.read_byte_array().await.unwrap(), b"payload");
    assert!(right.read_byte_array().await.unwrap().is_empty());
    assert_eq!(right.read_utf().await.unwrap(), "héllo");
    assert!(right.read_bool().await.unwrap());
}

#[tokio::test]
async fn test_negative_length_is_rejected() {
    let (a, b) = tokio::io::duplex(64);
    let (_, mut aw) = tokio::io::split(a);
    let (br, bw) = tokio::io::split(b);
    aw.write_i32(-5).await.unwrap();

    let mut channel = SecureChannel::new(br, bw);
    assert!(matches!(
        channel.read_byte_array().await,
        Err(ChannelError::NegativeLength(-5))
    ));
}

#[tokio::test]
async fn test_deny_listed_object_is_rejected() {
    let (mut left, right) = pair();
    let class = "org.apache.commons.collections.functors.InvokerTransformer";
    let mut right = right.with_filter(ClassFilter::standard().allow(class));

    let gadget = Value::record(
        class,
        [
            ("iMethodName", Value::Text("exec".into())),
            ("iArgs", Value::List(vec![Value::Text("calc".into())])),
        ],
    );
    left.write_object(&gadget).await.unwrap();

    let err = right.read_object().await.unwrap_err();
    assert!(err.is_security_violation());
    assert!(err.to_string().contains(class));
}

#[tokio::test]
async fn test_unregistered_object_is_rejected() {
    let (mut left, mut right) = pair();

    left.write_object(&Value::record("com.example.Widget", [("id", Value::Int(1))]))
        .await
        .unwrap();

    match right.read_object().await {
        Err(ChannelError::SecurityViolation { class }) => assert_eq!(class, "com.example.Widget"),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[tokio::test]
async fn test_allowed_object_round_trip() {
    let (mut left, right) = pair();
    let mut right = right.with_filter(ClassFilter::standard().allow("hudson.model.Result"));

    let value = Value::List(vec![
        Value::record("hudson.model.Result", [("name", Value::Text("SUCCESS".into()))]),
        Value::Long(-1),
    ]);
    left.write_object(&value).await.unwrap();

    assert_eq!(right.read_object().await.unwrap(), value);
}

async fn encrypted_string_exchange(transformation: Transformation) {
    let key = SessionKey::new(*b"0123456789abcdef").unwrap();
    let (left, right) = pair();

    let mut left = left.encrypt(&key, transformation).await.unwrap();
    let mut right = right.encrypt(&key, transformation).await.unwrap();

    left.write_utf("hello over a secret channel").await.unwrap();
    right.write_byte_array(b"and back").await.unwrap();

    assert_eq!(right.read_utf().await.unwrap(), "hello over a secret channel");
    assert_eq!(left.read_byte_array().await.unwrap(), b"and back");
}

#[tokio::test]
async fn test_cfb8_string_exchange() {
    encrypted_string_exchange(Transformation::AesCfb8NoPadding).await;
}

#[tokio::test]
async fn test_ctr_string_exchange() {
    encrypted_string_exchange("AES/CTR/NoPadding".parse().unwrap()).await;
}

#[tokio::test]
async fn test_no_plaintext_after_upgrade() {
    let key = SessionKey::new(vec![7u8; 32]).unwrap();
    let (a, b) = tokio::io::duplex(1024);
    let (ar, aw) = tokio::io::split(a);

    let mut channel = SecureChannel::new(ar, aw)
        .encrypt(&key, Transformation::AesCfb8NoPadding)
        .await
        .unwrap();
    channel.write_utf("plain words").await.unwrap();
    drop(channel);

    let mut raw = b;
    let mut wire = vec![0u8; 2 + "plain words".len()];
    raw.read_exact(&mut wire).await.unwrap();
    assert!(!wire.windows(5).any(|w| w == b"plain"));
}
