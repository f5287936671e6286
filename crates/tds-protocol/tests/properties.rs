//! Property tests for the login record and the token parser.

#![allow(clippy::unwrap_used, missing_docs)]

use bytes::Bytes;
use proptest::prelude::*;
use tds_protocol::{
    ColMetaData, ColumnData, ColumnFlags, Login7, MAX_FIELD_CHARS, TokenParser, TypeId, TypeInfo,
};

proptest! {
    #[test]
    fn login7_fields_survive_encoding_up_to_the_limit(
        user in "\\PC{0,200}",
        password in "\\PC{0,200}",
        database in "[a-zA-Z0-9_]{0,150}",
    ) {
        let login = Login7::new()
            .with_sql_auth(user.clone(), password.clone())
            .with_database(database.clone());
        let decoded = Login7::decode(&login.encode()).unwrap();

        for (original, restored) in [
            (&user, &decoded.username),
            (&password, &decoded.password),
            (&database, &decoded.database),
        ] {
            prop_assert!(restored.encode_utf16().count() <= MAX_FIELD_CHARS);
            prop_assert!(original.starts_with(restored.as_str()));
            if original.encode_utf16().count() <= MAX_FIELD_CHARS {
                prop_assert_eq!(original, restored);
            }
        }
    }

    #[test]
    fn token_parser_never_panics(data in proptest::collection::vec(any::<u8>(), 0..512)) {
        let metadata = ColMetaData {
            columns: vec![ColumnData {
                name: "c".into(),
                type_id: TypeId::NVarChar,
                user_type: 0,
                flags: ColumnFlags::NULLABLE,
                type_info: TypeInfo { max_length: Some(0xFFFF), ..Default::default() },
            }],
        };
        let mut parser = TokenParser::new(Bytes::from(data));
        while let Ok(Some(_)) = parser.next_token(Some(&metadata)) {}
    }

    #[test]
    fn split_input_decodes_like_whole_input(split in 0usize..40) {
        // DONE(MORE) followed by DONE(COUNT, 3)
        let data: [u8; 26] = [
            0xFD, 0x01, 0x00, 0xC1, 0x00, 0, 0, 0, 0, 0, 0, 0, 0,
            0xFD, 0x10, 0x00, 0xC1, 0x00, 3, 0, 0, 0, 0, 0, 0, 0,
        ];
        let split = split.min(data.len());

        let mut parser = TokenParser::empty();
        parser.push(&data[..split]);
        let mut tokens = Vec::new();
        loop {
            match parser.next_token(None) {
                Ok(Some(token)) => tokens.push(token),
                Ok(None) | Err(_) if parser.remaining() + parser.offset() < data.len() => {
                    parser.push(&data[split..]);
                }
                Ok(None) => break,
                Err(e) => return Err(TestCaseError::fail(e.to_string())),
            }
        }

        let whole: Vec<_> = {
            let mut parser = TokenParser::new(Bytes::copy_from_slice(&data));
            std::iter::from_fn(|| parser.next_token(None).unwrap()).collect()
        };
        prop_assert_eq!(tokens, whole);
    }
}
