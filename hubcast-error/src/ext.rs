use std::error::Error;

use crate::StatusCode;

/// Расширение для ошибок библиотеки (object-safe).
pub trait ErrorExt: Error + Send + Sync + 'static {
    /// Статус-код ошибки: по нему выбирается уровень логирования.
    ///
    /// По умолчанию возвращает [`StatusCode::Internal`].
    fn status_code(&self) -> StatusCode {
        StatusCode::Internal
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;

    use super::*;
    use crate::LogLevel;

    #[derive(Debug)]
    struct DefaultError;

    impl fmt::Display for DefaultError {
        fn fmt(
            &self,
            f: &mut fmt::Formatter<'_>,
        ) -> fmt::Result {
            write!(f, "DefaultError")
        }
    }

    impl Error for DefaultError {}

    impl ErrorExt for DefaultError {}

    /// Тест проверяет, что ошибка без своего кода считается внутренней и
    /// пишется в лог как ошибка.
    #[test]
    fn test_default_status_is_internal() {
        let e = DefaultError;
        assert_eq!(e.status_code(), StatusCode::Internal);
        assert_eq!(e.status_code().log_level(), LogLevel::Error);
    }
}
